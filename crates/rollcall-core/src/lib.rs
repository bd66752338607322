//! rollcall-core — Biometric template matching engine.
//!
//! Compares a live feature vector against an enrolled template using
//! Euclidean distance and a fixed decision threshold. Feature
//! extraction itself is out of scope: callers hand us a fixed-length
//! numeric vector produced elsewhere.

pub mod types;

pub use types::{
    display_confidence, match_template, MatchDecision, MatchError, Template, MATCH_THRESHOLD,
};
