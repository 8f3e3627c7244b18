//! The engine: creates instances, routes signals, answers queries and
//! resumes whatever a previous process left unfinished.
//!
//! Each instance runs as its own tokio task owning a [`WorkflowContext`].
//! Nothing is shared between instances except the audit log, the activity
//! invoker and the clock.

use super::context::{Services, WorkflowContext};
use super::error::{EngineError, ExecutionError, Result};
use super::query::InstanceView;
use super::router::SignalRouter;
use crate::activity::{invoke_with_policy, ActivityCall, ActivityInvocation, ActivityInvoker};
use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::config::EngineConfig;
use crate::core::{Clock, SystemClock};
use crate::model::{
    DomainPayload, InstanceState, InstanceStatus, Signal, SignalEnvelope, WorkflowType,
};
use crate::workflows;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What [`Engine::recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Incomplete instances whose control loop was restarted.
    pub resumed: Vec<Uuid>,
    /// Terminated instances whose trail was handed to the archive.
    pub archived: Vec<Uuid>,
}

pub struct Engine {
    services: Services,
    router: SignalRouter,
    snapshots: Arc<DashMap<Uuid, watch::Receiver<InstanceState>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl Engine {
    pub fn new(log: Arc<dyn AuditLog>, invoker: Arc<dyn ActivityInvoker>) -> Self {
        Self {
            services: Services {
                log,
                invoker,
                clock: Arc::new(SystemClock),
                config: Arc::new(EngineConfig::default()),
                shutdown: CancellationToken::new(),
            },
            router: SignalRouter::new(),
            snapshots: Arc::new(DashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.services.config = Arc::new(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.services.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn router(&self) -> &SignalRouter {
        &self.router
    }

    /// Validates `payload`, records the instance and starts its control loop.
    ///
    /// This is the only call that reports a business-level problem as an
    /// error; everything after creation is reported through queries.
    pub async fn create_instance(
        &self,
        workflow_type: WorkflowType,
        payload: DomainPayload,
    ) -> Result<Uuid> {
        payload
            .validate(workflow_type)
            .map_err(|problems| EngineError::InvalidPayload(problems.join("; ")))?;

        let instance_id = Uuid::new_v4();
        let entry = AuditEntry::new(
            instance_id,
            1,
            self.services.clock.now(),
            AuditEvent::InstanceCreated {
                workflow_type,
                payload,
            },
        );
        self.services.log.append(&entry).await?;
        let state = InstanceState::created(&entry)?;

        info!(
            "Instance created: instance={}, type={}",
            instance_id, workflow_type
        );
        self.spawn(state, Vec::new());
        Ok(instance_id)
    }

    /// Validates and delivers a signal. Fire-and-forget: the outcome shows up
    /// in the audit trail and in queries.
    pub async fn signal(&self, instance_id: Uuid, signal: Signal) -> Result<()> {
        signal.validate()?;
        let envelope = SignalEnvelope {
            signal,
            received_at: self.services.clock.now(),
        };

        let Err(envelope) = self.router.route(instance_id, envelope) else {
            return Ok(());
        };

        let closed = match self.snapshot(instance_id) {
            Some(state) if state.is_terminal() => Some(state.status),
            _ => self
                .services
                .log
                .instance(instance_id)
                .await?
                .ok_or(EngineError::UnknownInstance(instance_id))?
                .terminal_status,
        };
        match closed {
            Some(status) => {
                warn!(
                    "Signal refused, instance closed: instance={}, signal={}, actor={}, status={}",
                    instance_id,
                    envelope.signal.kind(),
                    envelope.signal.actor(),
                    status
                );
                Err(EngineError::InstanceClosed {
                    instance_id,
                    status,
                })
            }
            None => Err(EngineError::NotRunning(instance_id)),
        }
    }

    /// Current state of an instance. Running instances answer from memory;
    /// anything else is rebuilt by folding its audit trail.
    pub async fn query(&self, instance_id: Uuid) -> Result<InstanceView> {
        if let Some(state) = self.snapshot(instance_id) {
            return Ok(InstanceView::new(state));
        }
        let entries = self.audit_trail(instance_id).await?;
        Ok(InstanceView::new(InstanceState::replay(&entries)?))
    }

    pub async fn audit_trail(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        let entries = self.services.log.entries(instance_id).await?;
        if entries.is_empty() {
            return Err(EngineError::UnknownInstance(instance_id));
        }
        Ok(entries)
    }

    /// Resolves once the instance reaches a terminal status, or as soon as its
    /// control loop stops for any other reason.
    pub async fn wait_for_terminal(&self, instance_id: Uuid) -> Result<InstanceView> {
        let receiver = self
            .snapshots
            .get(&instance_id)
            .map(|receiver| receiver.clone());
        if let Some(mut receiver) = receiver {
            if let Ok(state) = receiver.wait_for(InstanceState::is_terminal).await {
                return Ok(InstanceView::new(state.clone()));
            }
        }
        self.query(instance_id).await
    }

    /// Resumes every incomplete instance in the log and re-archives
    /// terminated instances whose trail never reached the archive.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for instance_id in self.services.log.incomplete_instances().await? {
            if self.router.is_routed(instance_id) {
                continue;
            }
            let mut entries = self.services.log.entries(instance_id).await?;
            if entries.is_empty() {
                continue;
            }
            let history = entries.split_off(1);
            let state = InstanceState::created(&entries[0])?;
            info!(
                "Resuming instance: instance={}, type={}, entries={}",
                instance_id,
                state.workflow_type,
                history.len() + 1
            );
            self.spawn(state, history);
            report.resumed.push(instance_id);
        }

        for instance_id in self.services.log.unarchived_instances().await? {
            // Instances run by this engine are archived by their own task.
            if self.snapshots.contains_key(&instance_id) {
                continue;
            }
            let Some(status) = self
                .services
                .log
                .instance(instance_id)
                .await?
                .and_then(|record| record.terminal_status)
            else {
                continue;
            };
            if archive(&self.services, instance_id, status).await {
                report.archived.push(instance_id);
            }
        }

        info!(
            "Recovery complete: resumed={}, archived={}",
            report.resumed.len(),
            report.archived.len()
        );
        Ok(report)
    }

    /// Stops every control loop at its next suspension point and waits for
    /// the tasks to finish. Instances that did not terminate stay incomplete
    /// in the log and resume on the next [`recover`](Self::recover).
    pub async fn shutdown(&self) {
        self.services.shutdown.cancel();
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Instance task panicked: {}", e);
            }
        }
        info!("Engine stopped");
    }

    fn snapshot(&self, instance_id: Uuid) -> Option<InstanceState> {
        self.snapshots
            .get(&instance_id)
            .map(|receiver| receiver.borrow().clone())
    }

    fn spawn(&self, state: InstanceState, history: Vec<AuditEntry>) {
        let instance_id = state.id;
        let mailbox = self.router.register(instance_id);
        let (snapshot, receiver) = watch::channel(state.clone());
        self.snapshots.insert(instance_id, receiver);

        let ctx = WorkflowContext::new(state, history, self.services.clone(), mailbox, snapshot);
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(drive(ctx, self.services.clone(), self.router.clone()));
    }
}

/// Runs one instance to completion.
async fn drive(mut ctx: WorkflowContext, services: Services, router: SignalRouter) {
    let instance_id = ctx.id();

    let (status, reason) = match workflows::run(&mut ctx).await {
        Ok(outcome) => (outcome.status, outcome.reason),
        Err(ExecutionError::Cancelled {
            requested_by,
            reason,
        }) => {
            info!(
                "Instance cancelled: instance={}, requested_by={}",
                instance_id, requested_by
            );
            let reason = reason.unwrap_or_else(|| format!("Cancelled by {}", requested_by));
            (InstanceStatus::Cancelled, Some(reason))
        }
        Err(ExecutionError::Activity { activity, reason }) => (
            InstanceStatus::Failed,
            Some(format!("{} failed: {}", activity, reason)),
        ),
        Err(ExecutionError::Shutdown) => {
            debug!("Instance suspended for shutdown: instance={}", instance_id);
            router.deregister(instance_id);
            return;
        }
        Err(e) => {
            error!("Instance halted: instance={}, error={}", instance_id, e);
            router.deregister(instance_id);
            return;
        }
    };

    if let Err(e) = close(&mut ctx, &services, &router, status, reason).await {
        error!(
            "Failed to close instance: instance={}, status={}, error={}",
            instance_id, status, e
        );
        router.deregister(instance_id);
    }
}

async fn close(
    ctx: &mut WorkflowContext,
    services: &Services,
    router: &SignalRouter,
    status: InstanceStatus,
    reason: Option<String>,
) -> std::result::Result<(), ExecutionError> {
    let instance_id = ctx.id();
    ctx.record(AuditEvent::Terminated {
        status,
        reason: reason.clone(),
    })
    .await?;
    ctx.absorb_history()?;
    info!(
        "Instance terminated: instance={}, status={}, reason={}",
        instance_id,
        status,
        reason.as_deref().unwrap_or("-")
    );

    router.deregister(instance_id);
    for envelope in ctx.drain_mailbox() {
        ctx.refuse_late_signal(envelope).await?;
    }

    services.log.mark_terminated(instance_id, status).await?;
    archive(services, instance_id, status).await;
    Ok(())
}

/// Hands a closed trail to the permanent archive. Returns whether it landed.
async fn archive(services: &Services, instance_id: Uuid, status: InstanceStatus) -> bool {
    let entries = match services.log.entries(instance_id).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read trail for archive: instance={}, error={}", instance_id, e);
            return false;
        }
    };
    let count = entries.len();

    let call = ActivityCall::RecordAuditEvent {
        instance_id,
        status,
        entries,
    };
    let key = format!("{}:archive:record_audit_event", instance_id);
    let invocation = ActivityInvocation::new(call, key)
        .with_timeout(services.config.activity.timeout_for("record_audit_event"))
        .with_retry_policy(services.config.activity.archive_retry_policy);

    let (result, attempts) = invoke_with_policy(services.invoker.as_ref(), &invocation).await;
    if let Err(e) = result {
        warn!(
            "Archive failed: instance={}, attempts={}, error={}",
            instance_id, attempts, e
        );
        return false;
    }

    match services.log.mark_archived(instance_id).await {
        Ok(()) => {
            debug!("Instance archived: instance={}, entries={}", instance_id, count);
            true
        }
        Err(e) => {
            warn!("Failed to mark archived: instance={}, error={}", instance_id, e);
            false
        }
    }
}
