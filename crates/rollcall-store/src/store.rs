use std::path::Path;

use chrono::NaiveDate;
use rollcall_core::Template;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::models::{
    AttendanceRecord, AttendanceStatus, FaceLogStatus, FaceRecognitionLog, LeaveStatus,
    PendingAttendance, PendingFaceLog, PendingLeave, Person, QrToken, Role, TokenStatus,
};
use crate::schema;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("a record for this person and date already exists")]
    DuplicateKey,
    #[error("undecodable column in store: {0}")]
    Corrupt(String),
}

/// True when the underlying SQLite error is a UNIQUE constraint hit.
fn unique_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Async handle to the attendance database.
///
/// All methods are short request-scoped operations; the multi-write
/// face-log decision runs inside a single SQLite transaction.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and initialize the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref().to_owned()).await?;
        Self::with_connection(conn).await
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            schema::init(conn)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // --- users ---

    pub async fn create_person(&self, name: &str, role: Role) -> Result<i64, StoreError> {
        let name = name.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (name, role) VALUES (?1, ?2)",
                    params![name, role],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        tracing::debug!(id, "person created");
        Ok(id)
    }

    pub async fn person(&self, id: i64) -> Result<Option<Person>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, role FROM users WHERE id = ?1",
                        [id],
                        |row| {
                            Ok(Person {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                role: row.get(2)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }

    /// All student accounts, ordered by name. Backs the manual-entry
    /// roster.
    pub async fn list_students(&self) -> Result<Vec<Person>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, role FROM users WHERE role = 'student' ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Person {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            role: row.get(2)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?)
    }

    // --- biometric templates ---

    /// Store (or overwrite) the enrolled template for a person. One
    /// active template per person.
    pub async fn register_template(
        &self,
        user_id: i64,
        template: &Template,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(template)
            .map_err(|e| StoreError::Corrupt(format!("template encode: {e}")))?;
        let affected = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET face_data = ?1 WHERE id = ?2",
                    params![json, user_id],
                )?)
            })
            .await?;
        if affected == 0 {
            return Err(StoreError::Corrupt(format!("no such user: {user_id}")));
        }
        tracing::info!(user_id, "biometric template registered");
        Ok(())
    }

    pub async fn template(&self, user_id: i64) -> Result<Option<Template>, StoreError> {
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT face_data FROM users WHERE id = ?1",
                        [user_id],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten())
            })
            .await?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("template decode: {e}"))),
        }
    }

    pub async fn has_template(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.template(user_id).await?.is_some())
    }

    // --- QR tokens ---

    /// Record a freshly issued token. Issuance itself is an external
    /// process; the engine only ever reads tokens.
    pub async fn insert_token(&self, uuid: &str, date: NaiveDate) -> Result<(), StoreError> {
        let uuid = uuid.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO qrcode (uuid, status, date) VALUES (?1, ?2, ?3)",
                    params![uuid, TokenStatus::Active, date],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| {
                if unique_violation(&e) {
                    StoreError::DuplicateKey
                } else {
                    StoreError::Sqlite(e)
                }
            })
    }

    /// Flip a token to `expired`. Never re-activated. Returns false if
    /// the token does not exist.
    pub async fn expire_token(&self, uuid: &str) -> Result<bool, StoreError> {
        let uuid = uuid.to_string();
        let affected = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE qrcode SET status = ?1 WHERE uuid = ?2",
                    params![TokenStatus::Expired, uuid],
                )?)
            })
            .await?;
        Ok(affected > 0)
    }

    pub async fn token(&self, uuid: &str) -> Result<Option<QrToken>, StoreError> {
        let uuid = uuid.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT uuid, status, date FROM qrcode WHERE uuid = ?1",
                        [uuid],
                        |row| {
                            Ok(QrToken {
                                uuid: row.get(0)?,
                                status: row.get(1)?,
                                date: row.get(2)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }

    // --- leave requests ---

    pub async fn create_leave_request(
        &self,
        user_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> Result<(), StoreError> {
        let reason = reason.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO leave_requests (user_id, start_date, end_date, reason, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![user_id, start_date, end_date, reason, LeaveStatus::Pending],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Whether any leave request covers `date` for this person.
    ///
    /// Deliberately ignores the request's status: a pending or even
    /// rejected request still blocks self-attendance. Preserved source
    /// behavior, flagged for product review in DESIGN.md.
    pub async fn leave_covering(&self, user_id: i64, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                let exists: i64 = conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM leave_requests
                        WHERE user_id = ?1 AND start_date <= ?2 AND end_date >= ?2)",
                    params![user_id, date],
                    |row| row.get(0),
                )?;
                Ok(exists != 0)
            })
            .await?)
    }

    // --- attendance records ---

    /// Write the attendance status for (person, date): update in place
    /// if a row exists, insert otherwise. The UNIQUE constraint makes
    /// this atomic per key; rows are never deleted.
    pub async fn upsert_attendance(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (user_id, date, status) VALUES (?1, ?2, ?3)
                     ON CONFLICT (user_id, date) DO UPDATE SET status = excluded.status",
                    params![user_id, date, status],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!(user_id, %date, %status, "attendance upserted");
        Ok(())
    }

    pub async fn attendance(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT user_id, date, status FROM attendance
                         WHERE user_id = ?1 AND date = ?2",
                        params![user_id, date],
                        |row| {
                            Ok(AttendanceRecord {
                                user_id: row.get(0)?,
                                date: row.get(1)?,
                                status: row.get(2)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }

    /// All attendance rows for a date, for the daily report.
    pub async fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, date, status FROM attendance
                     WHERE date = ?1 ORDER BY user_id",
                )?;
                let rows = stmt
                    .query_map([date], |row| {
                        Ok(AttendanceRecord {
                            user_id: row.get(0)?,
                            date: row.get(1)?,
                            status: row.get(2)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Point-in-time snapshot of provisional attendance rows, joined
    /// with names for the admin view.
    pub async fn list_pending_attendance(&self) -> Result<Vec<PendingAttendance>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.user_id, u.name, a.date, a.status
                     FROM attendance a JOIN users u ON u.id = a.user_id
                     WHERE a.status IN ('pending', 'latePending')
                     ORDER BY a.date, u.name",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(PendingAttendance {
                            user_id: row.get(0)?,
                            name: row.get(1)?,
                            date: row.get(2)?,
                            status: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Set the status of a provisional attendance row. Resolved rows
    /// (`absent`, `approved`, `rejected`) are left untouched. Returns
    /// the number of rows affected; zero signals a stale admin view.
    pub async fn decide_attendance(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE attendance SET status = ?1
                     WHERE user_id = ?2 AND date = ?3
                       AND status IN ('pending', 'latePending')",
                    params![status, user_id, date],
                )?)
            })
            .await?)
    }

    // --- face recognition logs ---

    /// Insert today's face-claim log with status `pending`. A prior log
    /// for the same (person, date) surfaces as [`StoreError::DuplicateKey`]
    /// via the UNIQUE constraint, so two racing claims cannot both land.
    pub async fn insert_face_log(
        &self,
        user_id: i64,
        date: NaiveDate,
        confidence_score: f32,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_recognition_logs (user_id, date, confidence_score, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, date, confidence_score, FaceLogStatus::Pending],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| {
                if unique_violation(&e) {
                    StoreError::DuplicateKey
                } else {
                    StoreError::Sqlite(e)
                }
            })
    }

    pub async fn face_log(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<FaceRecognitionLog>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT user_id, date, confidence_score, status
                         FROM face_recognition_logs WHERE user_id = ?1 AND date = ?2",
                        params![user_id, date],
                        |row| {
                            Ok(FaceRecognitionLog {
                                user_id: row.get(0)?,
                                date: row.get(1)?,
                                confidence_score: row.get(2)?,
                                status: row.get(3)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }

    pub async fn list_pending_face_logs(&self) -> Result<Vec<PendingFaceLog>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.user_id, u.name, f.date, f.confidence_score
                     FROM face_recognition_logs f JOIN users u ON u.id = f.user_id
                     WHERE f.status = 'pending'
                     ORDER BY f.date, u.name",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(PendingFaceLog {
                            user_id: row.get(0)?,
                            name: row.get(1)?,
                            date: row.get(2)?,
                            confidence_score: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Set a pending face log's status and, when approving, upsert the
    /// paired attendance record to `approved` — both inside one
    /// transaction. Already-decided logs are left untouched and leave
    /// the attendance table alone. Returns the number of log rows
    /// affected.
    pub async fn decide_face_log(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: FaceLogStatus,
    ) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let affected = tx.execute(
                    "UPDATE face_recognition_logs SET status = ?1
                     WHERE user_id = ?2 AND date = ?3 AND status = 'pending'",
                    params![status, user_id, date],
                )?;
                if affected > 0 && status == FaceLogStatus::Approved {
                    tx.execute(
                        "INSERT INTO attendance (user_id, date, status) VALUES (?1, ?2, ?3)
                         ON CONFLICT (user_id, date) DO UPDATE SET status = excluded.status",
                        params![user_id, date, AttendanceStatus::Approved],
                    )?;
                }
                tx.commit()?;
                Ok(affected)
            })
            .await?)
    }

    // --- leave confirmation ---

    pub async fn list_pending_leave(&self) -> Result<Vec<PendingLeave>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT l.user_id, u.name, l.start_date, l.end_date, l.reason
                     FROM leave_requests l JOIN users u ON u.id = l.user_id
                     WHERE l.status = 'pending'
                     ORDER BY l.start_date, u.name",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(PendingLeave {
                            user_id: row.get(0)?,
                            name: row.get(1)?,
                            start_date: row.get(2)?,
                            end_date: row.get(3)?,
                            reason: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Set a pending leave request's status, keyed by (person, start,
    /// end). Already-decided requests are left untouched. No
    /// attendance side effect. Returns rows affected.
    pub async fn decide_leave(
        &self,
        user_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: LeaveStatus,
    ) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE leave_requests SET status = ?1
                     WHERE user_id = ?2 AND start_date = ?3 AND end_date = ?4
                       AND status = 'pending'",
                    params![status, user_id, start_date, end_date],
                )?)
            })
            .await?)
    }
}
