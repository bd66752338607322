use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance at or below which two feature vectors are considered the
/// same person.
pub const MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("feature vector length {live} does not match enrolled template length {stored}")]
    DimensionMismatch { live: usize, stored: usize },
    #[error("enrolled template is empty")]
    EmptyTemplate,
}

/// An enrolled biometric template — a fixed-length feature vector.
///
/// Serializes as a bare JSON float array, the same shape the store
/// keeps in the `face_data` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template {
    pub values: Vec<f32>,
}

impl Template {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance to another vector of the same length.
    pub fn euclidean_distance(&self, other: &[f32]) -> f32 {
        self.values
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Outcome of comparing a live vector against a stored template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDecision {
    pub matched: bool,
    /// Raw Euclidean distance between the two vectors.
    pub distance: f32,
    /// `1 − distance`, recorded as-is. Not clamped: a poor match can
    /// yield a value outside [0, 1]. Use [`display_confidence`] when
    /// rendering for humans.
    pub confidence: f32,
}

/// Clamp a raw confidence score to [0, 1] for presentation. The match
/// decision itself always uses the raw distance.
pub fn display_confidence(confidence: f32) -> f32 {
    confidence.clamp(0.0, 1.0)
}

/// Decide whether a live feature vector matches an enrolled template.
///
/// Pure function of the two vectors and the threshold: no side
/// effects, no I/O. Vectors must be equal-length; the engine does not
/// reconcile mismatched extractor versions.
pub fn match_template(
    live: &[f32],
    stored: &Template,
    threshold: f32,
) -> Result<MatchDecision, MatchError> {
    if stored.is_empty() {
        return Err(MatchError::EmptyTemplate);
    }
    if live.len() != stored.len() {
        return Err(MatchError::DimensionMismatch {
            live: live.len(),
            stored: stored.len(),
        });
    }

    let distance = stored.euclidean_distance(live);
    let matched = distance <= threshold;

    tracing::debug!(distance, threshold, matched, "template comparison");

    Ok(MatchDecision {
        matched,
        distance,
        confidence: 1.0 - distance,
    })
}
