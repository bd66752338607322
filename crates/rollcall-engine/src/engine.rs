use chrono::NaiveDate;
use rollcall_core::{match_template, MatchError, MATCH_THRESHOLD};
use rollcall_store::{
    AttendanceStatus, FaceLogStatus, LeaveStatus, PendingAttendance, PendingFaceLog, PendingLeave,
    Store, StoreError, TokenStatus,
};

use crate::error::EngineError;

/// An administrator's verdict on a provisional record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Result of an accepted face claim.
#[derive(Debug, Clone, Copy)]
pub struct FaceClaimOutcome {
    pub distance: f32,
    /// Raw `1 − distance`, as recorded on the log.
    pub confidence: f32,
}

/// The attendance verification and confirmation engine.
///
/// Holds the store handle and the biometric decision threshold. Every
/// operation is a short request-scoped call; the engine never retries
/// on its own — a failed claim is the claim's outcome.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    match_threshold: f32,
}

impl Engine {
    pub fn new(store: Store) -> Self {
        Self::with_threshold(store, MATCH_THRESHOLD)
    }

    pub fn with_threshold(store: Store, match_threshold: f32) -> Self {
        Self {
            store,
            match_threshold,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- token validator ---

    /// Check a QR token and return its associated date.
    ///
    /// Read-only: expiry transitions are driven by an external
    /// scheduler, never here.
    pub async fn validate_token(&self, uuid: &str) -> Result<NaiveDate, EngineError> {
        let token = self.store.token(uuid).await?.ok_or_else(|| {
            tracing::warn!(uuid, "claim with unknown token");
            EngineError::NotFound
        })?;
        if token.status == TokenStatus::Expired {
            tracing::info!(uuid, "claim with expired token");
            return Err(EngineError::Expired);
        }
        Ok(token.date)
    }

    // --- leave conflict checker ---

    /// Whether any leave request covers `date` for this person,
    /// regardless of the request's status.
    pub async fn leave_conflict(&self, user_id: i64, date: NaiveDate) -> Result<bool, EngineError> {
        Ok(self.store.leave_covering(user_id, date).await?)
    }

    // --- claim paths ---

    /// QR-token claim. On success the attendance record for the
    /// token's date is written `approved` directly — the QR path has
    /// no administrator gate.
    pub async fn qr_claim(&self, uuid: &str, user_id: i64) -> Result<NaiveDate, EngineError> {
        let date = self.validate_token(uuid).await?;

        if self.leave_conflict(user_id, date).await? {
            tracing::info!(user_id, %date, "claim blocked by leave request");
            return Err(EngineError::LeaveConflict);
        }

        // Terminal statuses never transition on the self-service path:
        // a scan cannot revive an absent or rejected record, and a
        // repeat scan of an approved day is just a duplicate. Only
        // provisional rows are superseded.
        if let Some(rec) = self.store.attendance(user_id, date).await? {
            if !rec.status.is_provisional() {
                tracing::info!(user_id, %date, status = %rec.status, "QR claim on resolved record");
                return Err(EngineError::DuplicateClaim);
            }
        }

        self.store
            .upsert_attendance(user_id, date, AttendanceStatus::Approved)
            .await?;
        tracing::info!(user_id, %date, "QR attendance recorded");
        Ok(date)
    }

    /// Biometric claim for `date` (callers pass today).
    ///
    /// On a successful match exactly one `pending` log is inserted,
    /// carrying the raw confidence score. Every failure path leaves
    /// the store untouched.
    pub async fn face_claim(
        &self,
        user_id: i64,
        live: &[f32],
        date: NaiveDate,
    ) -> Result<FaceClaimOutcome, EngineError> {
        let template = self
            .store
            .template(user_id)
            .await?
            .ok_or(EngineError::NoTemplate)?;

        let decision = match match_template(live, &template, self.match_threshold) {
            Ok(d) => d,
            Err(e @ (MatchError::DimensionMismatch { .. } | MatchError::EmptyTemplate)) => {
                // An incomparable vector is a failed match, not a
                // distinct outcome; the engine does not reconcile
                // extractor versions.
                tracing::warn!(user_id, error = %e, "template comparison impossible");
                return Err(EngineError::MatchFailed {
                    distance: f32::INFINITY,
                });
            }
        };

        if !decision.matched {
            tracing::info!(user_id, distance = decision.distance, "face match failed");
            return Err(EngineError::MatchFailed {
                distance: decision.distance,
            });
        }

        if self.store.face_log(user_id, date).await?.is_some() {
            return Err(EngineError::DuplicateClaim);
        }

        match self
            .store
            .insert_face_log(user_id, date, decision.confidence)
            .await
        {
            Ok(()) => {}
            // A racing claim can slip between the check and the
            // insert; the UNIQUE constraint converts it here.
            Err(StoreError::DuplicateKey) => return Err(EngineError::DuplicateClaim),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            user_id,
            %date,
            distance = decision.distance,
            confidence = decision.confidence,
            "face attendance logged pending"
        );
        Ok(FaceClaimOutcome {
            distance: decision.distance,
            confidence: decision.confidence,
        })
    }

    /// Manual administrator entry: upsert any status for (person,
    /// date), including terminal `absent`. Idempotent per key.
    pub async fn manual_entry(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), EngineError> {
        self.store.upsert_attendance(user_id, date, status).await?;
        tracing::info!(user_id, %date, %status, "manual attendance entry");
        Ok(())
    }

    // --- confirmation workflow ---

    /// Snapshot of attendance rows awaiting a decision (`pending` and
    /// `latePending`, treated identically for promotion).
    pub async fn pending_attendance(&self) -> Result<Vec<PendingAttendance>, EngineError> {
        Ok(self.store.list_pending_attendance().await?)
    }

    pub async fn pending_face_logs(&self) -> Result<Vec<PendingFaceLog>, EngineError> {
        Ok(self.store.list_pending_face_logs().await?)
    }

    pub async fn pending_leave(&self) -> Result<Vec<PendingLeave>, EngineError> {
        Ok(self.store.list_pending_leave().await?)
    }

    /// Promote or reject a provisional attendance record. Zero rows
    /// affected means another administrator already resolved it.
    pub async fn confirm_attendance(
        &self,
        user_id: i64,
        date: NaiveDate,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let status = match decision {
            Decision::Approve => AttendanceStatus::Approved,
            Decision::Reject => AttendanceStatus::Rejected,
        };
        let affected = self.store.decide_attendance(user_id, date, status).await?;
        if affected == 0 {
            tracing::warn!(user_id, %date, "attendance decision matched no row");
            return Err(EngineError::StaleDecision);
        }
        tracing::info!(user_id, %date, %status, "attendance confirmed");
        Ok(())
    }

    /// Decide a pending face log. Approval also upserts the paired
    /// attendance record to `approved`; both writes happen in one
    /// store transaction, so either both land or neither does.
    pub async fn confirm_face_log(
        &self,
        user_id: i64,
        date: NaiveDate,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let status = match decision {
            Decision::Approve => FaceLogStatus::Approved,
            Decision::Reject => FaceLogStatus::Rejected,
        };
        let affected = match self.store.decide_face_log(user_id, date, status).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(user_id, %date, error = %e, "face confirmation rolled back");
                return Err(EngineError::TransactionFailure);
            }
        };
        if affected == 0 {
            tracing::warn!(user_id, %date, "face decision matched no log");
            return Err(EngineError::StaleDecision);
        }
        tracing::info!(user_id, %date, %status, "face log confirmed");
        Ok(())
    }

    /// Decide a leave request, keyed by (person, start, end). No
    /// attendance side effect.
    pub async fn confirm_leave(
        &self,
        user_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let status = match decision {
            Decision::Approve => LeaveStatus::Approved,
            Decision::Reject => LeaveStatus::Rejected,
        };
        let affected = self
            .store
            .decide_leave(user_id, start_date, end_date, status)
            .await?;
        if affected == 0 {
            return Err(EngineError::StaleDecision);
        }
        tracing::info!(user_id, %start_date, %end_date, %status, "leave request confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Template;
    use rollcall_store::Role;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn engine_with_student() -> (Engine, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_person("Asha", Role::Student).await.unwrap();
        (Engine::new(store), id)
    }

    #[tokio::test]
    async fn test_qr_claim_writes_approved_directly() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();

        let claimed = engine.qr_claim("abc-123", id).await.unwrap();
        assert_eq!(claimed, d);

        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
        // no admin gate on this path
        assert!(engine.pending_attendance().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_rejected_without_write() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();
        engine.store().expire_token("abc-123").await.unwrap();

        let err = engine.qr_claim("abc-123", id).await.unwrap_err();
        assert!(matches!(err, EngineError::Expired));
        assert!(engine.store().attendance(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forged_token_is_not_found() {
        let (engine, id) = engine_with_student().await;
        let err = engine.qr_claim("no-such-token", id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[tokio::test]
    async fn test_leave_request_blocks_valid_token() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();
        engine
            .store()
            .create_leave_request(id, date("2024-02-28"), date("2024-03-02"), "travel")
            .await
            .unwrap();

        let err = engine.qr_claim("abc-123", id).await.unwrap_err();
        assert!(matches!(err, EngineError::LeaveConflict));
        assert!(engine.store().attendance(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_face_claim_logs_pending_with_confidence() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();

        // distance = sqrt(0.27^2 + 0.36^2) = 0.45
        let outcome = engine.face_claim(id, &[0.27, 0.36], d).await.unwrap();
        assert!((outcome.distance - 0.45).abs() < 1e-5);
        assert!((outcome.confidence - 0.55).abs() < 1e-5);

        let log = engine.store().face_log(id, d).await.unwrap().unwrap();
        assert_eq!(log.status, FaceLogStatus::Pending);
        assert!((log.confidence_score - 0.55).abs() < 1e-5);
        // face path never writes attendance by itself
        assert!(engine.store().attendance(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_face_claim_same_day_is_duplicate() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();

        engine.face_claim(id, &[0.27, 0.36], d).await.unwrap();
        let err = engine.face_claim(id, &[0.0, 0.0], d).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateClaim));

        // next day is a fresh claim
        engine.face_claim(id, &[0.0, 0.0], date("2024-03-02")).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_match_inserts_nothing() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();

        let err = engine.face_claim(id, &[1.0, 1.0], d).await.unwrap_err();
        match err {
            EngineError::MatchFailed { distance } => assert!(distance > 0.6),
            other => panic!("expected MatchFailed, got {other:?}"),
        }
        assert!(engine.store().face_log(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_template_is_distinct_from_failed_match() {
        let (engine, id) = engine_with_student().await;
        let err = engine
            .face_claim(id, &[0.1, 0.2], date("2024-03-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoTemplate));
    }

    #[tokio::test]
    async fn test_mismatched_vector_length_fails_match() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0, 0.0]))
            .await
            .unwrap();

        let err = engine.face_claim(id, &[0.0, 0.0], d).await.unwrap_err();
        assert!(matches!(err, EngineError::MatchFailed { .. }));
        assert!(engine.store().face_log(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approving_face_log_pairs_attendance() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();
        engine.face_claim(id, &[0.27, 0.36], d).await.unwrap();

        engine
            .confirm_face_log(id, d, Decision::Approve)
            .await
            .unwrap();

        let log = engine.store().face_log(id, d).await.unwrap().unwrap();
        assert_eq!(log.status, FaceLogStatus::Approved);
        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
    }

    #[tokio::test]
    async fn test_rejecting_face_log_has_no_attendance_side_effect() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();
        engine.face_claim(id, &[0.27, 0.36], d).await.unwrap();

        engine
            .confirm_face_log(id, d, Decision::Reject)
            .await
            .unwrap();

        let log = engine.store().face_log(id, d).await.unwrap().unwrap();
        assert_eq!(log.status, FaceLogStatus::Rejected);
        assert!(engine.store().attendance(id, d).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_decisions_surface() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");

        let err = engine
            .confirm_attendance(id, d, Decision::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));

        let err = engine
            .confirm_face_log(id, d, Decision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));
        assert!(engine.store().attendance(id, d).await.unwrap().is_none());

        let err = engine
            .confirm_leave(id, d, d, Decision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));
    }

    #[tokio::test]
    async fn test_provisional_promotion_and_rejection() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .manual_entry(id, d, AttendanceStatus::LatePending)
            .await
            .unwrap();

        let pending = engine.pending_attendance().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, AttendanceStatus::LatePending);
        assert_eq!(pending[0].name, "Asha");

        engine
            .confirm_attendance(id, d, Decision::Approve)
            .await
            .unwrap();
        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
        assert!(engine.pending_attendance().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_qr_claim_cannot_revive_terminal_absent() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();
        engine
            .manual_entry(id, d, AttendanceStatus::Absent)
            .await
            .unwrap();

        let err = engine.qr_claim("abc-123", id).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateClaim));
        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Absent);
    }

    #[tokio::test]
    async fn test_qr_rescan_of_resolved_day_is_duplicate() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();

        engine.qr_claim("abc-123", id).await.unwrap();
        let err = engine.qr_claim("abc-123", id).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateClaim));

        // a provisional row, by contrast, is superseded by a scan
        let d2 = date("2024-03-02");
        engine.store().insert_token("def-456", d2).await.unwrap();
        engine
            .manual_entry(id, d2, AttendanceStatus::LatePending)
            .await
            .unwrap();
        engine.qr_claim("def-456", id).await.unwrap();
        let rec = engine.store().attendance(id, d2).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
    }

    #[tokio::test]
    async fn test_second_attendance_decision_is_stale_not_flipped() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .manual_entry(id, d, AttendanceStatus::Pending)
            .await
            .unwrap();
        engine
            .confirm_attendance(id, d, Decision::Approve)
            .await
            .unwrap();

        let err = engine
            .confirm_attendance(id, d, Decision::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));
        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
    }

    #[tokio::test]
    async fn test_second_face_decision_is_stale_not_flipped() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();
        engine.face_claim(id, &[0.27, 0.36], d).await.unwrap();
        engine
            .confirm_face_log(id, d, Decision::Approve)
            .await
            .unwrap();

        let err = engine
            .confirm_face_log(id, d, Decision::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));
        let log = engine.store().face_log(id, d).await.unwrap().unwrap();
        assert_eq!(log.status, FaceLogStatus::Approved);
        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Approved);
    }

    #[tokio::test]
    async fn test_second_leave_decision_is_stale() {
        let (engine, id) = engine_with_student().await;
        let start = date("2024-03-01");
        let end = date("2024-03-03");
        engine
            .store()
            .create_leave_request(id, start, end, "family")
            .await
            .unwrap();
        engine
            .confirm_leave(id, start, end, Decision::Approve)
            .await
            .unwrap();

        let err = engine
            .confirm_leave(id, start, end, Decision::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleDecision));
    }

    #[tokio::test]
    async fn test_manual_absent_is_idempotent() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");

        engine
            .manual_entry(id, d, AttendanceStatus::Absent)
            .await
            .unwrap();
        engine
            .manual_entry(id, d, AttendanceStatus::Absent)
            .await
            .unwrap();

        let rec = engine.store().attendance(id, d).await.unwrap().unwrap();
        assert_eq!(rec.status, AttendanceStatus::Absent);
        assert_eq!(engine.store().attendance_on(d).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_record_per_person_per_day_across_paths() {
        let (engine, id) = engine_with_student().await;
        let d = date("2024-03-01");
        engine.store().insert_token("abc-123", d).await.unwrap();
        engine
            .store()
            .register_template(id, &Template::new(vec![0.0, 0.0]))
            .await
            .unwrap();

        // manual pending, then QR claim, then face claim + approval —
        // the record is mutated in place throughout
        engine
            .manual_entry(id, d, AttendanceStatus::Pending)
            .await
            .unwrap();
        engine.qr_claim("abc-123", id).await.unwrap();
        engine.face_claim(id, &[0.0, 0.0], d).await.unwrap();
        engine
            .confirm_face_log(id, d, Decision::Approve)
            .await
            .unwrap();

        let rows = engine.store().attendance_on(d).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AttendanceStatus::Approved);
    }

    #[tokio::test]
    async fn test_leave_confirmation_updates_request_only() {
        let (engine, id) = engine_with_student().await;
        let start = date("2024-03-01");
        let end = date("2024-03-03");
        engine
            .store()
            .create_leave_request(id, start, end, "family")
            .await
            .unwrap();

        assert_eq!(engine.pending_leave().await.unwrap().len(), 1);
        engine
            .confirm_leave(id, start, end, Decision::Approve)
            .await
            .unwrap();
        assert!(engine.pending_leave().await.unwrap().is_empty());
        // approving leave never touches attendance
        assert!(engine
            .store()
            .attendance(id, start)
            .await
            .unwrap()
            .is_none());
    }
}
