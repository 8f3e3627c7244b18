use super::{
    check_append, error::Result, error::StorageError, AuditEntry, AuditEvent, AuditLog,
    InstanceRecord,
};
use crate::model::{InstanceStatus, WorkflowType};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default pool size for SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Durable audit log on SQLite.
///
/// One row per entry in `audit_log`, keyed by `(instance_id, seq)`; the key
/// makes a second writer at the same position fail instead of overwriting.
/// Timestamps are stored as RFC 3339 strings with nanosecond precision so a
/// trail read back from disk folds into exactly the state the live run had.
pub struct SqliteAuditLog {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteAuditLog {
    /// Opens (creating if needed) the database at `db_path` with the default
    /// pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;

        let log = Self {
            pool,
            db_path: db_path_str,
        };
        log.initialize().await?;

        info!("Opened SQLite audit log at {}", log.db_path);
        Ok(log)
    }

    /// A private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(0),
            ..PoolConfig::default()
        };

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &config).await?;

        let log = Self {
            pool,
            db_path: ":memory:".to_string(),
        };
        log.initialize().await?;

        Ok(log)
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        if let Some(max_lifetime) = config.max_lifetime {
            builder = builder.max_lifetime(max_lifetime);
        }

        if let Some(idle_timeout) = config.idle_timeout {
            builder = builder.idle_timeout(idle_timeout);
        }

        builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS instances (
                instance_id TEXT PRIMARY KEY,
                workflow_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                terminal_status TEXT,
                archived INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                instance_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL,
                PRIMARY KEY (instance_id, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_instances_open ON instances(terminal_status, archived)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry> {
        let instance_id: String = row.try_get("instance_id")?;
        let seq: i64 = row.try_get("seq")?;
        let timestamp: String = row.try_get("timestamp")?;
        let actor: String = row.try_get("actor")?;
        let action: String = row.try_get("action")?;
        let detail: String = row.try_get("detail")?;

        let corrupt = |reason: String| StorageError::Corrupt {
            instance_id: instance_id.clone(),
            seq,
            reason,
        };

        let id = Uuid::parse_str(&instance_id).map_err(|e| corrupt(e.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);
        let detail: serde_json::Value =
            serde_json::from_str(&detail).map_err(|e| corrupt(e.to_string()))?;

        Ok(AuditEntry::from_parts(
            id,
            seq as u64,
            timestamp,
            actor,
            &action,
            detail,
        )?)
    }

    fn row_to_record(row: &SqliteRow) -> Result<InstanceRecord> {
        let instance_id: String = row.try_get("instance_id")?;
        let workflow_type: String = row.try_get("workflow_type")?;
        let created_at: String = row.try_get("created_at")?;
        let terminal_status: Option<String> = row.try_get("terminal_status")?;
        let archived: i64 = row.try_get("archived")?;

        let corrupt = |reason: String| StorageError::Corrupt {
            instance_id: instance_id.clone(),
            seq: 0,
            reason,
        };

        Ok(InstanceRecord {
            instance_id: Uuid::parse_str(&instance_id).map_err(|e| corrupt(e.to_string()))?,
            workflow_type: WorkflowType::from_str(&workflow_type)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| corrupt(e.to_string()))?
                .with_timezone(&Utc),
            terminal_status: terminal_status
                .map(|status| InstanceStatus::from_str(&status))
                .transpose()?,
            archived: archived != 0,
        })
    }

    async fn ids_where(&self, predicate: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(&format!(
            "SELECT instance_id FROM instances WHERE {} ORDER BY created_at",
            predicate
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("instance_id")?;
                Uuid::parse_str(&id).map_err(|e| StorageError::Corrupt {
                    instance_id: id.clone(),
                    seq: 0,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn rfc3339(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let instance_id = entry.instance_id().to_string();
        let mut tx = self.pool.begin().await?;

        let last_seq: Option<i64> =
            sqlx::query("SELECT MAX(seq) AS last_seq FROM audit_log WHERE instance_id = ?")
                .bind(&instance_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("last_seq")?;
        check_append(entry, last_seq.map(|seq| seq as u64))?;

        if let AuditEvent::InstanceCreated { workflow_type, .. } = entry.event() {
            sqlx::query(
                "INSERT INTO instances (instance_id, workflow_type, created_at, terminal_status, archived)
                 VALUES (?, ?, ?, NULL, 0)",
            )
            .bind(&instance_id)
            .bind(workflow_type.as_str())
            .bind(rfc3339(entry.timestamp()))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO audit_log (instance_id, seq, timestamp, actor, action, detail)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance_id)
        .bind(entry.seq() as i64)
        .bind(rfc3339(entry.timestamp()))
        .bind(entry.actor())
        .bind(entry.action())
        .bind(entry.detail().to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Appended audit entry: instance={}, seq={}, action={}",
            instance_id,
            entry.seq(),
            entry.action()
        );
        Ok(())
    }

    async fn entries(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT instance_id, seq, timestamp, actor, action, detail
             FROM audit_log
             WHERE instance_id = ?
             ORDER BY seq ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>> {
        sqlx::query(
            "SELECT instance_id, workflow_type, created_at, terminal_status, archived
             FROM instances WHERE instance_id = ?",
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| Self::row_to_record(&row))
        .transpose()
    }

    async fn instances(&self) -> Result<Vec<InstanceRecord>> {
        let rows = sqlx::query(
            "SELECT instance_id, workflow_type, created_at, terminal_status, archived
             FROM instances ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn incomplete_instances(&self) -> Result<Vec<Uuid>> {
        self.ids_where("terminal_status IS NULL").await
    }

    async fn unarchived_instances(&self) -> Result<Vec<Uuid>> {
        self.ids_where("terminal_status IS NOT NULL AND archived = 0")
            .await
    }

    async fn mark_terminated(&self, instance_id: Uuid, status: InstanceStatus) -> Result<()> {
        let result = sqlx::query("UPDATE instances SET terminal_status = ? WHERE instance_id = ?")
            .bind(status.as_str())
            .bind(instance_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownInstance(instance_id));
        }
        Ok(())
    }

    async fn mark_archived(&self, instance_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE instances SET archived = 1 WHERE instance_id = ?")
            .bind(instance_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownInstance(instance_id));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomainPayload, FundingSource, Requisition, Signal, Urgency};
    use rust_decimal::Decimal;

    fn requisition_created(id: Uuid, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry::new(
            id,
            1,
            at,
            AuditEvent::InstanceCreated {
                workflow_type: WorkflowType::Approval,
                payload: DomainPayload::Requisition(Requisition {
                    requisition_id: "REQ-77".into(),
                    requester_id: "alice".into(),
                    department: "biology".into(),
                    budget_code: "BIO-2".into(),
                    vendor_id: "V-2".into(),
                    category: "equipment".into(),
                    total: Decimal::new(1234550, 2),
                    funding: FundingSource::Institutional,
                    urgency: Urgency::Rush,
                    line_items: vec![],
                    quote_count: 1,
                    sole_source_justification: None,
                }),
            },
        )
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let id = Uuid::new_v4();
        let at = Utc::now();

        let signal = AuditEntry::new(
            id,
            2,
            at,
            AuditEvent::SignalReceived {
                signal: Signal::approve("sam").with_note("ok"),
                received_at: at,
            },
        );

        {
            let log = SqliteAuditLog::new(&path).await.unwrap();
            log.append(&requisition_created(id, at)).await.unwrap();
            log.append(&signal).await.unwrap();
            log.close().await.unwrap();
        }

        let log = SqliteAuditLog::new(&path).await.unwrap();
        let entries = log.entries(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], requisition_created(id, at));
        assert_eq!(entries[1], signal);
        assert_eq!(entries[1].actor(), "sam");
        assert_eq!(log.incomplete_instances().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_sequence_conflict_writes_nothing() {
        let log = SqliteAuditLog::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        log.append(&requisition_created(id, Utc::now())).await.unwrap();

        let stale = AuditEntry::new(
            id,
            1,
            Utc::now(),
            AuditEvent::StatusChanged {
                status: InstanceStatus::Checking,
            },
        );
        assert!(matches!(
            log.append(&stale).await,
            Err(StorageError::SequenceConflict { expected: 2, .. })
        ));
        assert_eq!(log.entries(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_and_archive_flags() {
        let log = SqliteAuditLog::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        log.append(&requisition_created(id, Utc::now())).await.unwrap();

        log.mark_terminated(id, InstanceStatus::Approved).await.unwrap();
        assert_eq!(log.unarchived_instances().await.unwrap(), vec![id]);

        log.mark_archived(id).await.unwrap();
        let record = log.instance(id).await.unwrap().unwrap();
        assert_eq!(record.terminal_status, Some(InstanceStatus::Approved));
        assert!(record.archived);

        assert!(matches!(
            log.mark_archived(Uuid::new_v4()).await,
            Err(StorageError::UnknownInstance(_))
        ));
    }
}
