//! Error types for the fingerprint index and the near-duplicate detector.

use thiserror::Error;

/// Error returned by a caller-supplied fingerprint encoder.
///
/// Encoders are opaque to the index; the only thing the detector needs from
/// a failure is a human-readable reason, which is folded into
/// [`DetectorError::InvalidInput`] together with the lane name.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EncodeError(String);

impl EncodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors produced by the detection layer.
///
/// There is no fatal class here: a concurrent probe failure is handled at
/// the aggregation boundary and never surfaces as an error (see
/// `NearDuplicateDetector::is_near_duplicate`).
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Invalid configuration (builder or per-lane search settings).
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// An encoder failed to produce a fingerprint for this item.
    #[error("invalid input for lane `{lane}`: {reason}")]
    InvalidInput { lane: String, reason: String },
    /// The builder was finalized without any registered lanes.
    #[error("detector has no lanes configured")]
    NoLanes,
    /// Two lanes were registered under the same name.
    #[error("duplicate lane name `{0}`")]
    DuplicateLane(String),
}

impl DetectorError {
    pub(crate) fn invalid_input<E: std::fmt::Display>(lane: &str, err: E) -> Self {
        Self::InvalidInput {
            lane: lane.to_string(),
            reason: err.to_string(),
        }
    }
}
