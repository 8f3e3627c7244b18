use super::{check_append, AuditEntry, AuditEvent, AuditLog, InstanceRecord, Result, StorageError};
use crate::model::InstanceStatus;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

struct Trail {
    record: InstanceRecord,
    entries: Vec<AuditEntry>,
}

/// In-memory audit log using DashMap for concurrent access.
///
/// Each instance's trail sits behind its own shard entry, so appends to
/// different instances never contend and the sequence check plus push for
/// one instance happen under a single lock. Nothing survives the process;
/// use [`SqliteAuditLog`](super::SqliteAuditLog) when recovery matters.
#[derive(Default)]
pub struct InMemoryAuditLog {
    trails: DashMap<Uuid, Trail>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all instances.
    pub fn len(&self) -> usize {
        self.trails.iter().map(|trail| trail.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let instance_id = entry.instance_id();

        if let AuditEvent::InstanceCreated { workflow_type, .. } = entry.event() {
            match self.trails.entry(instance_id) {
                Entry::Occupied(existing) => {
                    return Err(StorageError::SequenceConflict {
                        instance_id,
                        expected: existing.get().entries.len() as u64 + 1,
                        found: entry.seq(),
                    });
                }
                Entry::Vacant(slot) => {
                    check_append(entry, None)?;
                    slot.insert(Trail {
                        record: InstanceRecord {
                            instance_id,
                            workflow_type: *workflow_type,
                            created_at: entry.timestamp(),
                            terminal_status: None,
                            archived: false,
                        },
                        entries: vec![entry.clone()],
                    });
                }
            }
        } else {
            let mut trail = self
                .trails
                .get_mut(&instance_id)
                .ok_or(StorageError::UnknownInstance(instance_id))?;
            check_append(entry, trail.entries.last().map(AuditEntry::seq))?;
            trail.entries.push(entry.clone());
        }

        debug!(
            "Appended audit entry: instance={}, seq={}, action={}",
            instance_id,
            entry.seq(),
            entry.action()
        );
        Ok(())
    }

    async fn entries(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        Ok(self
            .trails
            .get(&instance_id)
            .map(|trail| trail.entries.clone())
            .unwrap_or_default())
    }

    async fn instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>> {
        Ok(self.trails.get(&instance_id).map(|trail| trail.record.clone()))
    }

    async fn instances(&self) -> Result<Vec<InstanceRecord>> {
        let mut records: Vec<_> = self.trails.iter().map(|trail| trail.record.clone()).collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn incomplete_instances(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .instances()
            .await?
            .into_iter()
            .filter(|record| record.terminal_status.is_none())
            .map(|record| record.instance_id)
            .collect())
    }

    async fn unarchived_instances(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .instances()
            .await?
            .into_iter()
            .filter(|record| record.terminal_status.is_some() && !record.archived)
            .map(|record| record.instance_id)
            .collect())
    }

    async fn mark_terminated(&self, instance_id: Uuid, status: InstanceStatus) -> Result<()> {
        let mut trail = self
            .trails
            .get_mut(&instance_id)
            .ok_or(StorageError::UnknownInstance(instance_id))?;
        trail.record.terminal_status = Some(status);
        Ok(())
    }

    async fn mark_archived(&self, instance_id: Uuid) -> Result<()> {
        let mut trail = self
            .trails
            .get_mut(&instance_id)
            .ok_or(StorageError::UnknownInstance(instance_id))?;
        trail.record.archived = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomainPayload, Invoice, WorkflowType};
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn created(id: Uuid) -> AuditEntry {
        AuditEntry::new(
            id,
            1,
            Utc::now(),
            AuditEvent::InstanceCreated {
                workflow_type: WorkflowType::Reconciliation,
                payload: DomainPayload::Invoice(Invoice {
                    invoice_id: "INV-1".into(),
                    invoice_number: "A-1001".into(),
                    vendor_id: "V-9".into(),
                    po_number: None,
                    invoice_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                    total: Decimal::from(500),
                    line_items: vec![],
                    terms: None,
                }),
            },
        )
    }

    fn status(id: Uuid, seq: u64) -> AuditEntry {
        AuditEntry::new(
            id,
            seq,
            Utc::now(),
            AuditEvent::StatusChanged {
                status: InstanceStatus::Matching,
            },
        )
    }

    #[tokio::test]
    async fn test_append_enforces_sequence() {
        let log = InMemoryAuditLog::new();
        let id = Uuid::new_v4();

        log.append(&created(id)).await.unwrap();
        log.append(&status(id, 2)).await.unwrap();

        let err = log.append(&status(id, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::SequenceConflict {
                expected: 3,
                found: 2,
                ..
            }
        ));
        assert!(log.append(&status(id, 4)).await.is_err());
        assert!(log.append(&created(id)).await.is_err());

        let entries = log.entries(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].seq(), 2);
    }

    #[tokio::test]
    async fn test_append_requires_creation_first() {
        let log = InMemoryAuditLog::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            log.append(&status(id, 1)).await,
            Err(StorageError::UnknownInstance(_))
        ));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_flags() {
        let log = InMemoryAuditLog::new();
        let id = Uuid::new_v4();
        log.append(&created(id)).await.unwrap();

        assert_eq!(log.incomplete_instances().await.unwrap(), vec![id]);

        log.mark_terminated(id, InstanceStatus::Matched).await.unwrap();
        assert!(log.incomplete_instances().await.unwrap().is_empty());
        assert_eq!(log.unarchived_instances().await.unwrap(), vec![id]);

        log.mark_archived(id).await.unwrap();
        assert!(log.unarchived_instances().await.unwrap().is_empty());
        assert!(log.instance(id).await.unwrap().unwrap().archived);
    }
}
