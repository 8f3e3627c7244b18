use crate::core::Error as CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Audit log error type.
///
/// Wraps backend and serialization failures while preserving the full error
/// chain for debugging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Failed to open or configure the backend.
    #[error("connection error: {0}")]
    Connection(String),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An append did not land at the end of the trail. The trail is never
    /// rewritten, so the entry was refused.
    #[error("sequence conflict for instance {instance_id}: expected seq {expected}, got {found}")]
    SequenceConflict {
        instance_id: Uuid,
        expected: u64,
        found: u64,
    },

    /// The instance has never been created in this log.
    #[error("unknown instance: {0}")]
    UnknownInstance(Uuid),

    /// A stored row could not be decoded.
    #[error("corrupt audit row for instance {instance_id} seq {seq}: {reason}")]
    Corrupt {
        instance_id: String,
        seq: i64,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;
