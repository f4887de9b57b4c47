//! Error types for fsrs-core.

use thiserror::Error;

/// Result type alias using [`FsrsError`].
pub type Result<T> = std::result::Result<T, FsrsError>;

/// Errors that can occur while scheduling reviews or fitting parameters.
#[derive(Debug, Error)]
pub enum FsrsError {
    /// A review timestamp was supplied without UTC tagging.
    #[error("review_time must be UTC-aware")]
    NaiveTimestamp,

    /// Retention optimization requires at least 512 review logs.
    #[error("at least 512 review logs are required, got {actual}")]
    InsufficientReviewLogs { actual: usize },

    /// Retention optimization requires `review_duration` on every log.
    #[error("review log for card {card_id} at index {index} is missing review_duration")]
    MissingDuration { card_id: i64, index: usize },

    /// The optimizer's differentiable backend could not be constructed, e.g.
    /// because a parameter vector of the wrong length was supplied.
    #[error("could not construct optimizer: {reason}")]
    OptimizerUnavailable { reason: String },
}
