use std::io::Read;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::{display_confidence, Template};
use rollcall_engine::{Decision, Engine};
use rollcall_store::{AttendanceStatus, Role, Store};
use uuid::Uuid;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,
    /// Register an account
    AddUser {
        #[arg(short, long)]
        name: String,
        /// student or admin
        #[arg(short, long)]
        role: Role,
    },
    /// Enroll (or overwrite) a person's biometric template
    Enroll {
        #[arg(short, long)]
        user: i64,
        /// JSON float array, or '-' for stdin
        #[arg(short, long)]
        vector: String,
    },
    /// Check whether a person has an enrolled template
    CheckEnrollment {
        #[arg(short, long)]
        user: i64,
    },
    /// Issue a QR token for a date (plays the external issuance role)
    IssueToken {
        #[arg(short, long)]
        date: NaiveDate,
    },
    /// Expire a token (plays the external scheduler role)
    ExpireToken { uuid: String },
    /// Submit a presence claim
    #[command(subcommand)]
    Claim(ClaimCommands),
    /// Manual administrator attendance entry
    Manual {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        date: NaiveDate,
        /// absent, pending, latePending, approved or rejected
        #[arg(short, long)]
        status: AttendanceStatus,
    },
    /// File a leave request
    RequestLeave {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        reason: String,
    },
    /// List records awaiting administrator confirmation
    Pending {
        #[arg(value_enum, default_value_t = PendingKind::Attendance)]
        kind: PendingKind,
    },
    /// Apply an administrator decision
    #[command(subcommand)]
    Confirm(ConfirmCommands),
    /// Attendance report for a date
    Report {
        #[arg(short, long)]
        date: NaiveDate,
    },
    /// List student accounts
    Students,
}

#[derive(Subcommand)]
enum ClaimCommands {
    /// QR-token claim; writes the record approved on success
    Qr {
        #[arg(short, long)]
        token: String,
        #[arg(short, long)]
        user: i64,
    },
    /// Biometric claim; lands in the pending face log on a match
    Face {
        #[arg(short, long)]
        user: i64,
        /// JSON float array, or '-' for stdin
        #[arg(short, long)]
        vector: String,
        /// Claim date (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ConfirmCommands {
    Attendance {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(value_enum)]
        decision: DecisionArg,
    },
    Face {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(value_enum)]
        decision: DecisionArg,
    },
    Leave {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(value_enum)]
        decision: DecisionArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PendingKind {
    Attendance,
    Face,
    Leave,
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for Decision {
    fn from(d: DecisionArg) -> Self {
        match d {
            DecisionArg::Approve => Decision::Approve,
            DecisionArg::Reject => Decision::Reject,
        }
    }
}

/// Read a feature vector as a JSON float array from a file or stdin.
fn read_vector(source: &str) -> Result<Vec<f32>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading {source}"))?
    };
    serde_json::from_str(&raw).context("feature vector must be a JSON array of numbers")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();

    if let Some(parent) = cfg.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Store::open(&cfg.db_path)
        .await
        .with_context(|| format!("opening {}", cfg.db_path.display()))?;
    let engine = Engine::with_threshold(store, cfg.match_threshold);

    match cli.command {
        Commands::Init => {
            // schema is initialized on open
            println!("database ready at {}", cfg.db_path.display());
        }
        Commands::AddUser { name, role } => {
            let id = engine.store().create_person(&name, role).await?;
            println!("created user {id} ({name}, {role})");
        }
        Commands::Enroll { user, vector } => {
            let values = read_vector(&vector)?;
            engine
                .store()
                .register_template(user, &Template::new(values))
                .await?;
            println!("template enrolled for user {user}");
        }
        Commands::CheckEnrollment { user } => {
            if engine.store().has_template(user).await? {
                println!("user {user} has an enrolled template");
            } else {
                println!("user {user} has no enrolled template");
            }
        }
        Commands::IssueToken { date } => {
            let uuid = Uuid::new_v4().to_string();
            engine.store().insert_token(&uuid, date).await?;
            println!("{uuid}");
        }
        Commands::ExpireToken { uuid } => {
            if engine.store().expire_token(&uuid).await? {
                println!("token {uuid} expired");
            } else {
                println!("no such token: {uuid}");
            }
        }
        Commands::Claim(ClaimCommands::Qr { token, user }) => {
            let date = engine.qr_claim(&token, user).await?;
            println!("attendance approved for user {user} on {date}");
        }
        Commands::Claim(ClaimCommands::Face { user, vector, date }) => {
            let values = read_vector(&vector)?;
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let outcome = engine.face_claim(user, &values, date).await?;
            println!(
                "face claim logged for user {user} on {date} (confidence {:.2}), awaiting confirmation",
                display_confidence(outcome.confidence)
            );
        }
        Commands::Manual { user, date, status } => {
            engine.manual_entry(user, date, status).await?;
            println!("attendance for user {user} on {date} set to {status}");
        }
        Commands::RequestLeave {
            user,
            start,
            end,
            reason,
        } => {
            engine
                .store()
                .create_leave_request(user, start, end, &reason)
                .await?;
            println!("leave requested for user {user}: {start}..{end}");
        }
        Commands::Pending { kind } => match kind {
            PendingKind::Attendance => {
                for row in engine.pending_attendance().await? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        row.user_id, row.name, row.date, row.status
                    );
                }
            }
            PendingKind::Face => {
                for row in engine.pending_face_logs().await? {
                    println!(
                        "{}\t{}\t{}\tconfidence {:.2}",
                        row.user_id,
                        row.name,
                        row.date,
                        display_confidence(row.confidence_score)
                    );
                }
            }
            PendingKind::Leave => {
                for row in engine.pending_leave().await? {
                    println!(
                        "{}\t{}\t{}..{}\t{}",
                        row.user_id, row.name, row.start_date, row.end_date, row.reason
                    );
                }
            }
        },
        Commands::Confirm(cmd) => match cmd {
            ConfirmCommands::Attendance {
                user,
                date,
                decision,
            } => {
                engine.confirm_attendance(user, date, decision.into()).await?;
                println!("attendance decision recorded");
            }
            ConfirmCommands::Face {
                user,
                date,
                decision,
            } => {
                engine.confirm_face_log(user, date, decision.into()).await?;
                println!("face log decision recorded");
            }
            ConfirmCommands::Leave {
                user,
                start,
                end,
                decision,
            } => {
                engine
                    .confirm_leave(user, start, end, decision.into())
                    .await?;
                println!("leave decision recorded");
            }
        },
        Commands::Report { date } => {
            for rec in engine.store().attendance_on(date).await? {
                println!("{}\t{}\t{}", rec.user_id, rec.date, rec.status);
            }
        }
        Commands::Students => {
            for p in engine.store().list_students().await? {
                println!("{}\t{}", p.id, p.name);
            }
        }
    }

    Ok(())
}
