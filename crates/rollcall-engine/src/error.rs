use rollcall_store::StoreError;
use thiserror::Error;

/// Claim and confirmation failures.
///
/// Validation errors are the claim's outcome — they are surfaced to
/// the submitter with a specific reason and never retried by the
/// engine. `TransactionFailure` is only ever returned after the store
/// has rolled back; no partial state is observable.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No such token exists; treated as a forged or fabricated claim.
    #[error("QR code not recognized")]
    NotFound,
    /// Token past its validity window. Never re-activated.
    #[error("QR code expired")]
    Expired,
    /// A leave request covers the claimed date, so the person cannot
    /// self-mark presence for it.
    #[error("a leave request covers this date")]
    LeaveConflict,
    /// Biometric claim with no enrolled template. Distinct from a
    /// failed match: the caller should redirect to enrollment, not
    /// retry.
    #[error("no face data registered; please register your face first")]
    NoTemplate,
    /// Distance above the threshold, or an incomparable vector.
    #[error("face verification failed")]
    MatchFailed { distance: f32 },
    /// A claim already exists for this person today.
    #[error("attendance already marked for today")]
    DuplicateClaim,
    /// The administrator's decision matched no row; their view of the
    /// pending list is stale and should be refreshed.
    #[error("record no longer pending; refresh the pending list")]
    StaleDecision,
    /// A multi-statement confirmation failed and was rolled back.
    #[error("confirmation failed; no changes were saved")]
    TransactionFailure,
    #[error(transparent)]
    Store(#[from] StoreError),
}
