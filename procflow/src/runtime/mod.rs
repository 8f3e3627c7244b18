//! WorkflowInstance runtime.
//!
//! This module hides the complexity of:
//! - Replaying an audit trail through workflow code after a restart
//! - Racing signals against durable timers with a deterministic winner
//! - Routing signals to the one control loop allowed to act on them
//! - Archiving closed trails
//!
//! The public surface is [`Engine`] plus the read-only [`InstanceView`].

mod context;
mod engine;
mod error;
pub(crate) mod escalation;
mod query;
mod router;

pub(crate) use context::WorkflowContext;
pub use engine::{Engine, RecoveryReport};
pub use error::{EngineError, ExecutionError, Result};
pub use query::InstanceView;
pub use router::SignalRouter;
