use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("unknown status value in store: {0:?}")]
pub struct ParseStatusError(pub String);

macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseStatusError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

status_enum!(Role {
    Student => "student",
    Admin => "admin",
});

status_enum!(TokenStatus {
    Active => "active",
    Expired => "expired",
});

status_enum!(LeaveStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

// Closed set of attendance states. `latePending` keeps the store's
// camelCase spelling on disk.
status_enum!(AttendanceStatus {
    Absent => "absent",
    Pending => "pending",
    LatePending => "latePending",
    Approved => "approved",
    Rejected => "rejected",
});

status_enum!(FaceLogStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

impl AttendanceStatus {
    /// Provisional statuses await an administrator decision; the two
    /// labels are treated identically for promotion.
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Pending | Self::LatePending)
    }
}

/// A registered account. The enrolled biometric template lives in a
/// separate column and is loaded on demand.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

/// An issued QR token. Consumed read-only by the validator; expiry is
/// driven by an external scheduler.
#[derive(Debug, Clone)]
pub struct QrToken {
    pub uuid: String,
    pub status: TokenStatus,
    pub date: NaiveDate,
}

/// The authoritative per-person-per-day attendance record. Unique on
/// (user_id, date); mutated in place, never duplicated or deleted.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub user_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

/// One face-claim log per person per day.
#[derive(Debug, Clone)]
pub struct FaceRecognitionLog {
    pub user_id: i64,
    pub date: NaiveDate,
    /// Raw `1 − distance`; may fall outside [0, 1].
    pub confidence_score: f32,
    pub status: FaceLogStatus,
}

/// Provisional attendance row joined with the person's name, for the
/// administrator's pending list.
#[derive(Debug, Clone)]
pub struct PendingAttendance {
    pub user_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct PendingFaceLog {
    pub user_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub confidence_score: f32,
}

#[derive(Debug, Clone)]
pub struct PendingLeave {
    pub user_id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
}
