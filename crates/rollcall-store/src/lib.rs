//! rollcall-store — Durable attendance state on SQLite.
//!
//! Owns the schema and every read/write the engine performs: users and
//! their enrolled templates, QR tokens, leave requests, attendance
//! records and face-recognition logs. Access goes through
//! [`Store`], an async wrapper over a `tokio_rusqlite` connection.

pub mod models;
pub mod schema;
pub mod store;

pub use models::{
    AttendanceRecord, AttendanceStatus, FaceLogStatus, FaceRecognitionLog, LeaveStatus,
    PendingAttendance, PendingFaceLog, PendingLeave, Person, QrToken, Role, TokenStatus,
};
pub use store::{Store, StoreError};
