use crate::core::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an activity.
///
/// Only the final error of a retry loop is recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ActivityError {
    #[error("{activity} timed out after {timeout:?}")]
    Timeout {
        activity: String,
        timeout: Duration,
    },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The request itself is malformed; retrying cannot help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("activity failed: {0}")]
    Failed(String),
}

impl Retryable for ActivityError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActivityError::InvalidInput(_) | ActivityError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ActivityError>;
