//! Timer / escalation scheduler.
//!
//! Two waits are built on [`WorkflowContext::next_input`]:
//!
//! - [`await_stage_decision`] drives one approval stage through its ladder:
//!   reminders at a fixed cadence, escalation once the reminders are used up,
//!   a grace window, then the stage's fallback. A stage handed to an
//!   administrator gets one more grace window before it is auto-rejected.
//! - [`await_exceptions`] blocks until every open exception is resolved or a
//!   global timeout (optionally followed by an administrator grace window)
//!   expires.
//!
//! Where on the ladder a stage is comes from folded state (`reminders_sent`,
//! `escalated`, `administrator`), never from local variables, so a resumed
//! instance picks up exactly where it stopped.

use super::context::{Input, WorkflowContext};
use super::error::ExecutionError;
use crate::activity::ActivityCall;
use crate::audit::{AuditEvent, SYSTEM_ACTOR};
use crate::model::{
    ActiveTimer, FallbackAction, ResolutionAction, Resolution, Signal, StageState, TimerPurpose,
};
use std::time::Duration;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, ExecutionError>;

/// How a stage was decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StageResolution {
    Approved,
    Rejected { actor: String, reason: String },
    Returned {
        actor: String,
        reason: String,
        return_to: String,
    },
}

/// Waits for the stage at `index` to be decided.
///
/// `cadence` is the effective reminder interval (already scaled for urgency).
pub(crate) async fn await_stage_decision(
    ctx: &mut WorkflowContext,
    index: usize,
    cadence: Duration,
) -> Result<StageResolution> {
    loop {
        let stage = current(ctx, index)?;
        let timer = match next_rung(&stage, index, cadence) {
            Some((purpose, after)) => Some(ctx.timer(purpose, after).await?),
            None => None,
        };

        match ctx.next_input(timer).await? {
            Input::Timer(fired) => {
                if let Some(resolution) = climb(ctx, index, &stage, fired).await? {
                    return Ok(resolution);
                }
            }
            Input::Signal(signal) => {
                if let Some(resolution) = decide(ctx, index, &stage, signal).await? {
                    return Ok(resolution);
                }
            }
        }
    }
}

fn current(ctx: &WorkflowContext, index: usize) -> Result<StageState> {
    ctx.state()
        .stages
        .get(index)
        .cloned()
        .ok_or(ExecutionError::Transition(
            crate::model::TransitionError::UnknownStage(index),
        ))
}

/// The timer guarding the stage's next step up the ladder, if any.
fn next_rung(
    stage: &StageState,
    index: usize,
    cadence: Duration,
) -> Option<(TimerPurpose, Duration)> {
    let policy = &stage.stage.escalation;
    if stage.administrator.is_some() {
        return Some((
            TimerPurpose::StageAdministratorGrace { index },
            policy.grace_period,
        ));
    }
    if stage.escalated {
        return Some((TimerPurpose::StageGrace { index }, policy.grace_period));
    }
    if stage.reminders_sent < policy.max_reminders {
        let reminder = stage.reminders_sent + 1;
        return Some((TimerPurpose::StageReminder { index, reminder }, cadence));
    }
    Some((TimerPurpose::StageEscalation { index }, cadence))
}

async fn climb(
    ctx: &mut WorkflowContext,
    index: usize,
    stage: &StageState,
    fired: ActiveTimer,
) -> Result<Option<StageResolution>> {
    let instance_id = ctx.id();
    let subject = format!("Approval pending: {}", stage.stage.name);

    match fired.purpose {
        TimerPurpose::StageReminder { reminder, .. } => {
            for recipient in stage.authorized_actors() {
                ctx.perform(ActivityCall::NotifyApprover {
                    instance_id,
                    recipient,
                    subject: format!("Reminder {}: {}", reminder, subject),
                    reminder: true,
                })
                .await?;
            }
            ctx.record(AuditEvent::ReminderSent {
                index,
                count: reminder,
            })
            .await?;
            Ok(None)
        }
        TimerPurpose::StageEscalation { .. } => {
            let escalate_to = stage.stage.escalation.escalate_to.clone();
            info!(
                "Stage escalated: instance={}, stage={}, escalate_to={:?}",
                instance_id, stage.stage.id, escalate_to
            );
            ctx.record(AuditEvent::Escalated {
                index,
                escalate_to: escalate_to.clone(),
            })
            .await?;
            if let Some(recipient) = escalate_to {
                ctx.perform(ActivityCall::NotifyApprover {
                    instance_id,
                    recipient,
                    subject: format!("Escalated: {}", subject),
                    reminder: false,
                })
                .await?;
            }
            Ok(None)
        }
        TimerPurpose::StageGrace { .. } => match &stage.stage.escalation.fallback {
            FallbackAction::AutoReject { reason } => {
                info!(
                    "Stage auto-rejected: instance={}, stage={}",
                    instance_id, stage.stage.id
                );
                ctx.record(AuditEvent::StageRejected {
                    index,
                    actor: SYSTEM_ACTOR.to_string(),
                    reason: reason.clone(),
                })
                .await?;
                Ok(Some(StageResolution::Rejected {
                    actor: SYSTEM_ACTOR.to_string(),
                    reason: reason.clone(),
                }))
            }
            FallbackAction::NotifyAdministrator { administrator } => {
                ctx.perform(ActivityCall::NotifyAdministrator {
                    instance_id,
                    recipient: administrator.clone(),
                    subject: format!("No decision after escalation: {}", stage.stage.name),
                })
                .await?;
                ctx.record(AuditEvent::AdministratorNotified {
                    administrator: administrator.clone(),
                    index: Some(index),
                })
                .await?;
                Ok(None)
            }
        },
        TimerPurpose::StageAdministratorGrace { .. } => {
            info!(
                "Stage auto-rejected after administrator grace: instance={}, stage={}, administrator={:?}",
                instance_id, stage.stage.id, stage.administrator
            );
            let reason = FallbackAction::ADMINISTRATOR_TIMEOUT_REASON.to_string();
            ctx.record(AuditEvent::StageRejected {
                index,
                actor: SYSTEM_ACTOR.to_string(),
                reason: reason.clone(),
            })
            .await?;
            Ok(Some(StageResolution::Rejected {
                actor: SYSTEM_ACTOR.to_string(),
                reason,
            }))
        }
        other => {
            warn!(
                "Ignoring unrelated timer: instance={}, purpose={}",
                instance_id, other
            );
            Ok(None)
        }
    }
}

/// Rejects signals aimed at a different stage than the active one.
fn stale(stage: &StageState, stage_id: &Option<String>) -> Option<String> {
    match stage_id {
        Some(id) if *id != stage.stage.id => Some(format!(
            "decision addressed to stage {} but stage {} is active",
            id, stage.stage.id
        )),
        _ => None,
    }
}

fn unauthorized(stage: &StageState, actor: &str) -> Option<String> {
    (!stage.is_authorized(actor)).then(|| {
        format!(
            "{} is not authorized to decide stage {}",
            actor, stage.stage.id
        )
    })
}

async fn decide(
    ctx: &mut WorkflowContext,
    index: usize,
    stage: &StageState,
    signal: Signal,
) -> Result<Option<StageResolution>> {
    match &signal {
        Signal::Approve {
            actor,
            comment,
            stage_id,
        } => {
            if let Some(reason) = stale(stage, stage_id).or_else(|| unauthorized(stage, actor)) {
                ctx.reject_signal(&signal, reason).await?;
                return Ok(None);
            }
            ctx.record(AuditEvent::StageApproved {
                index,
                actor: actor.clone(),
                comment: comment.clone(),
            })
            .await?;
            info!(
                "Stage approved: instance={}, stage={}, actor={}",
                ctx.id(),
                stage.stage.id,
                actor
            );
            Ok(Some(StageResolution::Approved))
        }
        Signal::Reject {
            actor,
            reason,
            stage_id,
        } => {
            if let Some(why) = stale(stage, stage_id).or_else(|| unauthorized(stage, actor)) {
                ctx.reject_signal(&signal, why).await?;
                return Ok(None);
            }
            ctx.record(AuditEvent::StageRejected {
                index,
                actor: actor.clone(),
                reason: reason.clone(),
            })
            .await?;
            Ok(Some(StageResolution::Rejected {
                actor: actor.clone(),
                reason: reason.clone(),
            }))
        }
        Signal::Return {
            actor,
            reason,
            return_to,
            stage_id,
        } => {
            if let Some(why) = stale(stage, stage_id).or_else(|| unauthorized(stage, actor)) {
                ctx.reject_signal(&signal, why).await?;
                return Ok(None);
            }
            ctx.record(AuditEvent::StageReturned {
                index,
                actor: actor.clone(),
                reason: reason.clone(),
                return_to: return_to.clone(),
            })
            .await?;
            Ok(Some(StageResolution::Returned {
                actor: actor.clone(),
                reason: reason.clone(),
                return_to: return_to.clone(),
            }))
        }
        Signal::Delegate { from, to, reason } => {
            if let Some(why) = unauthorized(stage, from) {
                ctx.reject_signal(&signal, why).await?;
                return Ok(None);
            }
            if stage.is_authorized(to) {
                let why = format!("{} is already authorized for stage {}", to, stage.stage.id);
                ctx.reject_signal(&signal, why).await?;
                return Ok(None);
            }
            ctx.record(AuditEvent::Delegated {
                index,
                from: from.clone(),
                to: to.clone(),
                reason: reason.clone(),
            })
            .await?;
            ctx.perform(ActivityCall::NotifyDelegate {
                instance_id: ctx.id(),
                recipient: to.clone(),
                delegated_by: from.clone(),
                subject: format!("Approval delegated: {}", stage.stage.name),
            })
            .await?;
            Ok(None)
        }
        Signal::ResolveException { .. } | Signal::Cancel { .. } => {
            ctx.reject_signal(&signal, "no exception is awaiting resolution".to_string())
                .await?;
            Ok(None)
        }
    }
}

// ============================================================================
// Exception sub-flow
// ============================================================================

/// What happens when the exception timeout expires.
#[derive(Debug, Clone)]
pub(crate) enum TimeoutFallback {
    /// Give up at once.
    Expire,
    /// Notify the administrator, who may then resolve any open exception,
    /// and give up after one more grace period.
    NotifyAdministrator {
        administrator: String,
        grace: Duration,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ExceptionWait {
    pub purpose: TimerPurpose,
    pub timeout: Duration,
    pub fallback: TimeoutFallback,
    pub allow_dispute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExceptionOutcome {
    /// Every exception reached a terminal status.
    Resolved,
    TimedOut { pending: Vec<String> },
}

pub(crate) async fn await_exceptions(
    ctx: &mut WorkflowContext,
    wait: &ExceptionWait,
) -> Result<ExceptionOutcome> {
    loop {
        let pending = pending_exceptions(ctx);
        if pending.is_empty() {
            let (approved, rejected) = ctx.state().resolution_counts();
            info!(
                "Exceptions resolved: instance={}, approved={}, rejected={}",
                ctx.id(),
                approved,
                rejected
            );
            return Ok(ExceptionOutcome::Resolved);
        }

        let escalated = ctx.state().exception_administrator.is_some();
        let timer = match &wait.fallback {
            TimeoutFallback::NotifyAdministrator { grace, .. } if escalated => {
                ctx.timer(TimerPurpose::ExceptionGrace, *grace).await?
            }
            _ => ctx.timer(wait.purpose, wait.timeout).await?,
        };

        match ctx.next_input(Some(timer)).await? {
            Input::Timer(fired) => {
                let notify = match (&wait.fallback, fired.purpose) {
                    (
                        TimeoutFallback::NotifyAdministrator { administrator, .. },
                        purpose,
                    ) if purpose == wait.purpose => Some(administrator.clone()),
                    _ => None,
                };
                let Some(administrator) = notify else {
                    info!(
                        "Exceptions timed out: instance={}, pending={:?}",
                        ctx.id(),
                        pending
                    );
                    ctx.record(AuditEvent::ExceptionsTimedOut {
                        pending: pending.clone(),
                    })
                    .await?;
                    return Ok(ExceptionOutcome::TimedOut { pending });
                };
                ctx.perform(ActivityCall::NotifyAdministrator {
                    instance_id: ctx.id(),
                    recipient: administrator.clone(),
                    subject: format!("Unresolved exceptions: {}", pending.join(", ")),
                })
                .await?;
                ctx.record(AuditEvent::AdministratorNotified {
                    administrator,
                    index: None,
                })
                .await?;
            }
            Input::Signal(signal) => resolve(ctx, wait, signal).await?,
        }
    }
}

fn pending_exceptions(ctx: &WorkflowContext) -> Vec<String> {
    ctx.state()
        .exceptions
        .iter()
        .filter(|exception| exception.is_pending())
        .map(|exception| exception.id.clone())
        .collect()
}

async fn resolve(ctx: &mut WorkflowContext, wait: &ExceptionWait, signal: Signal) -> Result<()> {
    let Signal::ResolveException {
        exception_id,
        action,
        actor,
        notes,
        adjustment,
    } = &signal
    else {
        return ctx
            .reject_signal(&signal, "no stage is awaiting a decision".to_string())
            .await;
    };

    let refusal = match ctx.state().exception(exception_id) {
        None => Some(format!("unknown exception {}", exception_id)),
        Some(exception) if !exception.is_pending() => {
            Some(format!("exception {} is already resolved", exception_id))
        }
        Some(exception)
            if exception.approver != *actor
                && ctx.state().exception_administrator.as_deref() != Some(actor.as_str()) =>
        {
            Some(format!(
                "{} is not authorized to resolve exception {}",
                actor, exception_id
            ))
        }
        Some(_) if *action == ResolutionAction::Dispute && !wait.allow_dispute => {
            Some(format!("exception {} cannot be disputed", exception_id))
        }
        Some(_) => None,
    };
    if let Some(reason) = refusal {
        return ctx.reject_signal(&signal, reason).await;
    }

    info!(
        "Exception resolved: instance={}, exception={}, action={}, actor={}",
        ctx.id(),
        exception_id,
        action,
        actor
    );
    ctx.record(AuditEvent::ExceptionResolved {
        exception_id: exception_id.clone(),
        resolution: Resolution {
            action: *action,
            actor: actor.clone(),
            notes: notes.clone(),
            adjustment: *adjustment,
        },
    })
    .await
}
