//! Per-instance execution context.
//!
//! A [`WorkflowContext`] owns everything one instance's control loop touches:
//! its folded state, the unreplayed tail of its audit trail, its mailbox and
//! handles to the shared audit log, activity invoker and clock.
//!
//! The context runs in one of two modes, decided entry by entry:
//!
//! - **Replay**: while recorded history remains, input events (activity
//!   results, timer starts and fires, signals) are taken from it and derived
//!   events are recomputed and checked against it.
//! - **Live**: once history is exhausted, inputs come from the world and every
//!   event is appended to the log before it is applied to state.
//!
//! Workflow code cannot tell the two apart, which is what makes resumption
//! after a crash exact.

use super::error::ExecutionError;
use crate::activity::{invoke_with_policy, ActivityCall, ActivityInvocation, ActivityInvoker};
use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::config::EngineConfig;
use crate::core::{fingerprint, from_json, to_json, Clock, Retryable};
use crate::model::{
    ActiveTimer, InstanceState, InstanceStatus, Signal, SignalEnvelope, TimerPurpose,
};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, ExecutionError>;

/// What woke a waiting workflow.
#[derive(Debug, Clone)]
pub(crate) enum Input {
    Signal(Signal),
    Timer(ActiveTimer),
}

/// Shared services handed to every instance.
#[derive(Clone)]
pub(crate) struct Services {
    pub log: Arc<dyn AuditLog>,
    pub invoker: Arc<dyn ActivityInvoker>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
    pub shutdown: CancellationToken,
}

pub(crate) struct WorkflowContext {
    state: InstanceState,
    history: VecDeque<AuditEntry>,
    services: Services,
    mailbox: mpsc::UnboundedReceiver<SignalEnvelope>,
    mailbox_open: bool,
    /// Signals received while the workflow was not waiting for one.
    buffered: VecDeque<SignalEnvelope>,
    snapshot: watch::Sender<InstanceState>,
}

impl WorkflowContext {
    pub(crate) fn new(
        state: InstanceState,
        history: Vec<AuditEntry>,
        services: Services,
        mailbox: mpsc::UnboundedReceiver<SignalEnvelope>,
        snapshot: watch::Sender<InstanceState>,
    ) -> Self {
        Self {
            state,
            history: history.into(),
            services,
            mailbox,
            mailbox_open: true,
            buffered: VecDeque::new(),
            snapshot,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.state.id
    }

    pub(crate) fn state(&self) -> &InstanceState {
        &self.state
    }

    pub(crate) fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.services.config)
    }

    pub(crate) fn is_replaying(&self) -> bool {
        !self.history.is_empty()
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Records a derived event.
    ///
    /// During replay the event must equal the next recorded entry; live, it is
    /// appended and then applied.
    pub(crate) async fn record(&mut self, event: AuditEvent) -> Result<()> {
        if let Some(recorded) = self.history.front() {
            if recorded.event() != &event {
                return Err(non_determinism(recorded, &event));
            }
            return self.replay_next();
        }

        let entry = AuditEntry::new(
            self.state.id,
            self.state.last_seq + 1,
            self.services.clock.now(),
            event,
        );
        self.services.log.append(&entry).await?;
        self.apply(&entry)
    }

    pub(crate) async fn set_status(&mut self, status: InstanceStatus) -> Result<()> {
        if self.state.status == status {
            return Ok(());
        }
        debug!(
            "Status change: instance={}, {} -> {}",
            self.state.id, self.state.status, status
        );
        self.record(AuditEvent::StatusChanged { status }).await
    }

    /// Records a signal that could not be applied. The signal itself was
    /// already recorded as received.
    pub(crate) async fn reject_signal(&mut self, signal: &Signal, reason: String) -> Result<()> {
        if !self.is_replaying() {
            warn!(
                "Signal rejected: instance={}, signal={}, actor={}, reason={}",
                self.state.id,
                signal.kind(),
                signal.actor(),
                reason
            );
        }
        self.record(AuditEvent::SignalRejected {
            signal: signal.kind(),
            actor: signal.actor().to_string(),
            reason,
        })
        .await
    }

    fn apply(&mut self, entry: &AuditEntry) -> Result<()> {
        self.state.apply(entry)?;
        self.snapshot.send_replace(self.state.clone());
        Ok(())
    }

    fn replay_next(&mut self) -> Result<()> {
        if let Some(entry) = self.history.pop_front() {
            self.apply(&entry)?;
            if self.history.is_empty() {
                info!(
                    "Replay complete: instance={}, seq={}, status={}",
                    self.state.id, self.state.last_seq, self.state.status
                );
            }
        }
        Ok(())
    }

    /// Applies whatever history is left without workflow code. Only entries
    /// written after the terminal record can remain at this point.
    pub(crate) fn absorb_history(&mut self) -> Result<()> {
        while !self.history.is_empty() {
            self.replay_next()?;
        }
        Ok(())
    }

    // ========================================================================
    // Activities
    // ========================================================================

    /// Invokes an activity and decodes its output.
    pub(crate) async fn call<T: DeserializeOwned>(&mut self, call: ActivityCall) -> Result<T> {
        let output = self.call_value(call).await?;
        Ok(from_json(output)?)
    }

    /// Invokes an activity whose output is not needed.
    pub(crate) async fn perform(&mut self, call: ActivityCall) -> Result<()> {
        self.call_value(call).await.map(|_| ())
    }

    async fn call_value(&mut self, call: ActivityCall) -> Result<serde_json::Value> {
        let name = call.name();
        let key = format!(
            "{}:{}:{}",
            self.state.id,
            self.state.activities_scheduled + 1,
            name
        );
        self.record(AuditEvent::ActivityScheduled {
            key: key.clone(),
            name: name.to_string(),
            input: to_json(&call)?,
            input_hash: fingerprint(&call)?,
        })
        .await?;

        if let Some(recorded) = self.history.front() {
            let outcome = match recorded.event() {
                AuditEvent::ActivityCompleted { output, .. } => Ok(output.clone()),
                AuditEvent::ActivityFailed { error, .. } => Err(ExecutionError::Activity {
                    activity: name.to_string(),
                    reason: error.clone(),
                }),
                AuditEvent::SignalReceived {
                    signal: Signal::Cancel { .. },
                    ..
                } => return self.next_recorded_input(None).await.map(|_| serde_json::Value::Null),
                _ => {
                    return Err(ExecutionError::NonDeterminism {
                        seq: recorded.seq(),
                        expected: format!("result of {}", key),
                        found: recorded.action().to_string(),
                    })
                }
            };
            self.replay_next()?;
            return outcome;
        }

        let invocation = ActivityInvocation::new(call, key.clone())
            .with_timeout(self.services.config.activity.timeout_for(name))
            .with_retry_policy(self.services.config.activity.retry_policy);
        let invoker = Arc::clone(&self.services.invoker);
        let run = async move { invoke_with_policy(invoker.as_ref(), &invocation).await };
        tokio::pin!(run);

        let (result, attempts) = loop {
            tokio::select! {
                biased;
                _ = self.services.shutdown.cancelled() => return Err(ExecutionError::Shutdown),
                received = self.mailbox.recv(), if self.mailbox_open => match received {
                    Some(envelope) if matches!(envelope.signal, Signal::Cancel { .. }) => {
                        info!(
                            "Cancel interrupted activity: instance={}, key={}",
                            self.state.id, key
                        );
                        return self.accept(envelope).await.map(|_| serde_json::Value::Null);
                    }
                    Some(envelope) => self.buffered.push_back(envelope),
                    None => self.mailbox_open = false,
                },
                done = &mut run => break done,
            }
        };

        match result {
            Ok(output) => {
                self.record(AuditEvent::ActivityCompleted {
                    key,
                    name: name.to_string(),
                    output: output.clone(),
                    attempts,
                })
                .await?;
                Ok(output)
            }
            Err(error) => {
                let reason = error.to_string();
                warn!(
                    "Activity failed: instance={}, activity={}, attempts={}, error={}",
                    self.state.id, name, attempts, reason
                );
                self.record(AuditEvent::ActivityFailed {
                    key,
                    name: name.to_string(),
                    error: reason.clone(),
                    attempts,
                    retryable: error.is_retryable(),
                })
                .await?;
                Err(ExecutionError::Activity {
                    activity: name.to_string(),
                    reason,
                })
            }
        }
    }

    // ========================================================================
    // Timers and signals
    // ========================================================================

    /// Starts a durable timer, or returns the one already running for
    /// `purpose`.
    pub(crate) async fn timer(
        &mut self,
        purpose: TimerPurpose,
        after: Duration,
    ) -> Result<ActiveTimer> {
        if let Some(active) = self.state.active_timer.filter(|t| t.purpose == purpose) {
            return Ok(active);
        }

        if let Some(recorded) = self.history.front() {
            return match recorded.event().started_timer() {
                Some(timer) if timer.purpose == purpose => {
                    self.replay_next()?;
                    Ok(timer)
                }
                _ => Err(ExecutionError::NonDeterminism {
                    seq: recorded.seq(),
                    expected: format!("timer_started ({})", purpose),
                    found: recorded.action().to_string(),
                }),
            };
        }

        let delay = chrono::Duration::from_std(after)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let timer = ActiveTimer {
            timer_id: self.state.timers_started + 1,
            purpose,
            due_at: self.services.clock.now() + delay,
        };
        debug!(
            "Timer started: instance={}, timer={}, purpose={}, due_at={}",
            self.state.id, timer.timer_id, purpose, timer.due_at
        );
        self.record(AuditEvent::TimerStarted {
            timer_id: timer.timer_id,
            purpose,
            due_at: timer.due_at,
        })
        .await?;
        Ok(timer)
    }

    /// Blocks until a signal arrives or `timer` fires, whichever is first.
    ///
    /// A signal beats the timer only if it was received strictly before the
    /// timer's due time. A cancel signal ends the wait with
    /// [`ExecutionError::Cancelled`].
    pub(crate) async fn next_input(&mut self, timer: Option<ActiveTimer>) -> Result<Input> {
        if self.is_replaying() {
            return self.next_recorded_input(timer).await;
        }

        loop {
            if let Some(envelope) = self.buffered.pop_front() {
                match timer {
                    Some(timer) if envelope.received_at >= timer.due_at => {
                        self.buffered.push_front(envelope);
                        return self.fire(timer).await;
                    }
                    _ => return self.accept(envelope).await,
                }
            }

            let remaining = timer.map(|t| {
                (t.due_at - self.services.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            });

            tokio::select! {
                biased;
                _ = self.services.shutdown.cancelled() => return Err(ExecutionError::Shutdown),
                received = self.mailbox.recv(), if self.mailbox_open => match received {
                    Some(envelope) => self.buffered.push_back(envelope),
                    None => self.mailbox_open = false,
                },
                _ = sleep_for(remaining) => {
                    if let Some(timer) = timer {
                        return self.fire(timer).await;
                    }
                }
            }
        }
    }

    async fn next_recorded_input(&mut self, timer: Option<ActiveTimer>) -> Result<Input> {
        let Some(recorded) = self.history.front() else {
            return Err(ExecutionError::NonDeterminism {
                seq: self.state.last_seq + 1,
                expected: "recorded input".to_string(),
                found: "end of trail".to_string(),
            });
        };

        let input = match recorded.event() {
            AuditEvent::SignalReceived { signal, .. } => Input::Signal(signal.clone()),
            AuditEvent::TimerFired { timer_id, .. } => match timer {
                Some(timer) if timer.timer_id == *timer_id => Input::Timer(timer),
                _ => {
                    return Err(ExecutionError::NonDeterminism {
                        seq: recorded.seq(),
                        expected: format!("fire of timer {:?}", timer.map(|t| t.timer_id)),
                        found: format!("fire of timer {}", timer_id),
                    })
                }
            },
            _ => {
                return Err(ExecutionError::NonDeterminism {
                    seq: recorded.seq(),
                    expected: "signal_received or timer_fired".to_string(),
                    found: recorded.action().to_string(),
                })
            }
        };
        self.replay_next()?;

        match input {
            Input::Signal(Signal::Cancel {
                requested_by,
                reason,
            }) => Err(ExecutionError::Cancelled {
                requested_by: requested_by
                    .unwrap_or_else(|| crate::audit::SYSTEM_ACTOR.to_string()),
                reason,
            }),
            input => Ok(input),
        }
    }

    async fn accept(&mut self, envelope: SignalEnvelope) -> Result<Input> {
        debug!(
            "Signal received: instance={}, signal={}, actor={}",
            self.state.id,
            envelope.signal.kind(),
            envelope.signal.actor()
        );
        self.record(AuditEvent::SignalReceived {
            signal: envelope.signal.clone(),
            received_at: envelope.received_at,
        })
        .await?;

        match envelope.signal {
            Signal::Cancel {
                requested_by,
                reason,
            } => Err(ExecutionError::Cancelled {
                requested_by: requested_by
                    .unwrap_or_else(|| crate::audit::SYSTEM_ACTOR.to_string()),
                reason,
            }),
            signal => Ok(Input::Signal(signal)),
        }
    }

    async fn fire(&mut self, timer: ActiveTimer) -> Result<Input> {
        info!(
            "Timer fired: instance={}, timer={}, purpose={}",
            self.state.id, timer.timer_id, timer.purpose
        );
        self.record(AuditEvent::TimerFired {
            timer_id: timer.timer_id,
            purpose: timer.purpose,
        })
        .await?;
        Ok(Input::Timer(timer))
    }

    /// Takes every signal still queued for a closed instance.
    pub(crate) fn drain_mailbox(&mut self) -> Vec<SignalEnvelope> {
        let mut drained: Vec<_> = self.buffered.drain(..).collect();
        while let Ok(envelope) = self.mailbox.try_recv() {
            drained.push(envelope);
        }
        drained
    }

    /// Records a signal that arrived after the instance closed.
    pub(crate) async fn refuse_late_signal(&mut self, envelope: SignalEnvelope) -> Result<()> {
        self.record(AuditEvent::SignalReceived {
            signal: envelope.signal.clone(),
            received_at: envelope.received_at,
        })
        .await?;
        self.reject_signal(&envelope.signal, "instance is closed".to_string())
            .await
    }
}

async fn sleep_for(remaining: Option<Duration>) {
    match remaining {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}

fn non_determinism(recorded: &AuditEntry, computed: &AuditEvent) -> ExecutionError {
    let found = match (recorded.event(), computed) {
        (
            AuditEvent::ActivityScheduled {
                name: stored,
                input_hash: stored_hash,
                ..
            },
            AuditEvent::ActivityScheduled {
                name, input_hash, ..
            },
        ) if stored == name => format!(
            "{} with input hash 0x{:016x} (computed 0x{:016x})",
            stored, stored_hash, input_hash
        ),
        (stored, _) => stored.action().to_string(),
    };
    ExecutionError::NonDeterminism {
        seq: recorded.seq(),
        expected: computed.action().to_string(),
        found,
    }
}
