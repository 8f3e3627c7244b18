use thiserror::Error;

/// Core error type for the procflow workflow engine.
///
/// This error type uses `thiserror` with `#[source]` annotations so the
/// underlying serde failure stays reachable when debugging a bad payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Serialization failed when encoding a value.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// An invalid status string was encountered during parsing.
    #[error("invalid instance status: {0}")]
    InvalidStatus(String),

    /// An invalid workflow type string was encountered during parsing.
    #[error("invalid workflow type: {0}")]
    InvalidWorkflowType(String),

    /// Payment terms could not be parsed (expected e.g. "2/10 net 30").
    #[error("invalid payment terms: {0}")]
    InvalidPaymentTerms(String),
}

pub type Result<T> = std::result::Result<T, Error>;
