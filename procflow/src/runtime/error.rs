use crate::audit::StorageError;
use crate::core::Error as CoreError;
use crate::model::{InstanceStatus, SignalValidationError, TransitionError, WorkflowType};
use thiserror::Error;
use uuid::Uuid;

/// Why a workflow stopped advancing.
///
/// `Cancelled` and `Activity` end the instance with a terminal status. The
/// rest leave the trail as it is, so the instance resumes on the next
/// [`Engine::recover`](super::Engine::recover).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Replay computed a different event than the one recorded.
    #[error("non-determinism at seq {seq}: workflow produced {expected}, trail has {found}")]
    NonDeterminism {
        seq: u64,
        expected: String,
        found: String,
    },

    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),

    /// An activity failed permanently or exhausted its retries.
    #[error("{activity} failed: {reason}")]
    Activity { activity: String, reason: String },

    #[error("cancelled by {requested_by}")]
    Cancelled {
        requested_by: String,
        reason: Option<String>,
    },

    /// The payload does not belong to this workflow type.
    #[error("{0} workflow started with the wrong payload kind")]
    PayloadMismatch(WorkflowType),

    #[error("engine shutting down")]
    Shutdown,
}

/// Errors surfaced to callers of [`Engine`](super::Engine).
///
/// Once an instance has started, its outcome is reported through queries;
/// these errors only cover requests the engine could not accept.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(#[from] SignalValidationError),

    #[error("unknown instance: {0}")]
    UnknownInstance(Uuid),

    #[error("instance {instance_id} is closed ({status})")]
    InstanceClosed {
        instance_id: Uuid,
        status: InstanceStatus,
    },

    /// The instance exists but is not loaded; run recovery first.
    #[error("instance {0} is not running")]
    NotRunning(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("audit trail does not replay: {0}")]
    Replay(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
