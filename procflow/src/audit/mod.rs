//! Audit log for procflow.
//!
//! The audit trail is the single source of truth for an instance: state is a
//! fold over it, recovery replays it, and on termination it is handed to the
//! permanent archive. Backends only ever append.
//!
//! - [`SqliteAuditLog`]: durable SQLite storage with connection pooling
//! - [`InMemoryAuditLog`]: DashMap-backed storage for tests and demos
//!
//! # Example
//!
//! ```no_run
//! use procflow::audit::{AuditLog, InMemoryAuditLog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryAuditLog::new();
//! assert!(log.incomplete_instances().await?.is_empty());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

mod error;
mod event;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StorageError};
pub use event::{AuditEntry, AuditEvent, SYSTEM_ACTOR};
pub use memory::InMemoryAuditLog;

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteAuditLog};

use crate::model::{InstanceStatus, WorkflowType};

/// Per-instance bookkeeping kept next to the trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: Uuid,
    pub workflow_type: WorkflowType,
    pub created_at: DateTime<Utc>,
    pub terminal_status: Option<InstanceStatus>,
    pub archived: bool,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Appends one entry.
    ///
    /// An `instance_created` entry with seq 1 registers the instance. Any
    /// other entry must carry exactly `last_seq + 1`, or the append fails with
    /// [`StorageError::SequenceConflict`] and nothing is written.
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// The full trail for an instance, in sequence order.
    async fn entries(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>>;

    async fn instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>>;

    async fn instances(&self) -> Result<Vec<InstanceRecord>>;

    /// Instances with no terminal status yet; these are resumed on startup.
    async fn incomplete_instances(&self) -> Result<Vec<Uuid>>;

    /// Terminated instances whose trail has not reached the archive.
    async fn unarchived_instances(&self) -> Result<Vec<Uuid>>;

    async fn mark_terminated(&self, instance_id: Uuid, status: InstanceStatus) -> Result<()>;

    async fn mark_archived(&self, instance_id: Uuid) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AuditLog for Arc<dyn AuditLog> {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        (**self).append(entry).await
    }

    async fn entries(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        (**self).entries(instance_id).await
    }

    async fn instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>> {
        (**self).instance(instance_id).await
    }

    async fn instances(&self) -> Result<Vec<InstanceRecord>> {
        (**self).instances().await
    }

    async fn incomplete_instances(&self) -> Result<Vec<Uuid>> {
        (**self).incomplete_instances().await
    }

    async fn unarchived_instances(&self) -> Result<Vec<Uuid>> {
        (**self).unarchived_instances().await
    }

    async fn mark_terminated(&self, instance_id: Uuid, status: InstanceStatus) -> Result<()> {
        (**self).mark_terminated(instance_id, status).await
    }

    async fn mark_archived(&self, instance_id: Uuid) -> Result<()> {
        (**self).mark_archived(instance_id).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Shared validation for backends: checks `entry` against the current tail.
pub(crate) fn check_append(entry: &AuditEntry, last_seq: Option<u64>) -> Result<()> {
    let expected = last_seq.map_or(1, |seq| seq + 1);
    if entry.seq() != expected {
        return Err(StorageError::SequenceConflict {
            instance_id: entry.instance_id(),
            expected,
            found: entry.seq(),
        });
    }
    let creates = matches!(entry.event(), AuditEvent::InstanceCreated { .. });
    match (last_seq, creates) {
        (None, false) => Err(StorageError::UnknownInstance(entry.instance_id())),
        (Some(_), true) => Err(StorageError::SequenceConflict {
            instance_id: entry.instance_id(),
            expected,
            found: 1,
        }),
        _ => Ok(()),
    }
}
