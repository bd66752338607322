use std::path::PathBuf;

use rollcall_core::MATCH_THRESHOLD;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance threshold for a positive face match.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", MATCH_THRESHOLD),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
