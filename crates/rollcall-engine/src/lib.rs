//! rollcall-engine — Attendance verification and confirmation.
//!
//! A claim of presence enters through one of three paths: a
//! time-limited QR token, a biometric face match, or a manual
//! administrator entry. The engine validates the claim, reconciles it
//! against leave records, writes the per-person-per-day attendance
//! state, and drives the administrator confirmation workflow that
//! promotes or rejects provisional records.

pub mod engine;
pub mod error;

pub use engine::{Decision, Engine, FaceClaimOutcome};
pub use error::EngineError;
