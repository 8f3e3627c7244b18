//! Procflow: durable procurement workflows for Rust
//!
//! `procflow` runs multi-day, multi-party business approvals (spending-policy
//! compliance, approval-chain routing, invoice reconciliation) as durable
//! workflow instances. Each instance survives a restart of the process that
//! hosts it, waits days or weeks for human decisions, and leaves an
//! append-only audit trail behind.
//!
//! # Features
//!
//! - **Durable execution**: every state change is appended to an [`AuditLog`] before it takes effect
//! - **Deterministic replay**: instance state is a pure fold over its audit trail
//! - **Escalation**: reminders, escalation and a timeout fallback per approval stage
//! - **Signals**: approve, reject, return, delegate, resolve exceptions, cancel
//! - **Activities**: external calls with idempotency keys, timeouts and retry policies
//!
//! # Quick Start
//!
//! ```ignore
//! use procflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(SqliteAuditLog::new("procflow.db").await?);
//!     let activities = Arc::new(DirectoryActivities::new());
//!     let engine = Engine::new(log, activities);
//!     engine.recover().await?;
//!
//!     let id = engine
//!         .create_instance(WorkflowType::Approval, DomainPayload::Requisition(requisition))
//!         .await?;
//!     engine.signal(id, Signal::approve("supervisor")).await?;
//!
//!     let view = engine.query(id).await?;
//!     println!("{} is {}", view.id(), view.status());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`core`]: Foundation (hides serialization format, retry loop, time source)
//! - [`model`]: Domain data and the fold that rebuilds instance state
//! - [`audit`]: Audit log (hides database choice and schema)
//! - [`activity`]: Activity contracts and the invocation wrapper
//! - [`config`]: Engine configuration
//! - [`runtime`]: Instance execution, timers, signal routing and queries

pub mod activity;
pub mod audit;
pub mod config;
pub mod core;
pub mod model;
pub mod runtime;
mod workflows;

pub use activity::{
    ActivityCall, ActivityError, ActivityInvocation, ActivityInvoker, DirectoryActivities,
};

pub use audit::{
    AuditEntry, AuditEvent, AuditLog, InMemoryAuditLog, InstanceRecord, Result as StorageResult,
    StorageError,
};

#[cfg(feature = "sqlite")]
pub use audit::SqliteAuditLog;

pub use config::EngineConfig;

pub use core::{Clock, Error as CoreError, RetryPolicy, SystemClock, TokioClock};

pub use model::{
    DomainPayload, InstanceState, InstanceStatus, Invoice, Requisition, Signal, WorkflowType,
};

pub use runtime::{
    Engine, EngineError, ExecutionError, InstanceView, RecoveryReport, Result, SignalRouter,
};

// Re-export dependencies used in the public API
pub use chrono;
pub use rust_decimal;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```ignore
/// use procflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::activity::{
        ActivityCall, ActivityError, ActivityInvocation, ActivityInvoker, Department,
        DirectoryActivities, SpecialistRule, VendorRecord,
    };

    pub use crate::audit::{
        AuditEntry, AuditEvent, AuditLog, InMemoryAuditLog, InstanceRecord, StorageError,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::audit::SqliteAuditLog;

    pub use crate::config::EngineConfig;

    pub use crate::core::{Clock, RetryPolicy, SystemClock, TokioClock};

    pub use crate::model::{
        DomainPayload, FundingSource, GrantFunding, InstanceState, InstanceStatus, Invoice,
        LineItem, PaymentTerms, PurchaseOrder, Receipt, ReceivedLine, Requisition,
        ResolutionAction, Signal, Urgency, WorkflowType,
    };

    pub use crate::runtime::{Engine, EngineError, InstanceView, RecoveryReport};

    pub use rust_decimal::Decimal;
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
