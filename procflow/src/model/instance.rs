//! Instance state as a left fold over the audit trail.
//!
//! [`InstanceState::apply`] is the only way state changes, live or replayed.
//! It reads nothing but the entry it is given, so folding the same trail
//! always produces the same state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{
    ActiveTimer, CheckRecord, Discrepancy, DomainPayload, ExceptionCase, ExceptionStatus,
    InstanceStatus, PaymentSchedule, StageDecision, StageState, StageStatus,
    WorkflowType,
};
use crate::audit::{AuditEntry, AuditEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransitionError {
    #[error("audit trail is empty")]
    EmptyTrail,

    #[error("first entry must be instance_created, found {0}")]
    NotCreated(&'static str),

    #[error("instance_created may only appear once")]
    AlreadyCreated,

    #[error("entry belongs to instance {found}, expected {expected}")]
    WrongInstance { expected: Uuid, found: Uuid },

    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("{status} is not a terminal status of {workflow_type} workflows")]
    ForeignTerminal {
        workflow_type: WorkflowType,
        status: InstanceStatus,
    },

    #[error("no stage at index {0}")]
    UnknownStage(usize),

    #[error("stage index may not move back from {current} to {requested}")]
    StageRegression { current: usize, requested: usize },

    #[error("stage {0} is already decided")]
    StageAlreadyDecided(usize),

    #[error("unknown exception {0}")]
    UnknownException(String),

    #[error("exception {0} is already resolved")]
    ExceptionAlreadyResolved(String),
}

/// Everything known about one instance, rebuilt from its audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: Uuid,
    pub workflow_type: WorkflowType,
    pub status: InstanceStatus,
    pub payload: DomainPayload,

    pub stages: Vec<StageState>,
    pub current_index: usize,
    pub checks: Vec<CheckRecord>,
    pub exceptions: Vec<ExceptionCase>,
    /// Administrator brought in after the exception set timed out.
    pub exception_administrator: Option<String>,
    pub discrepancies: Vec<Discrepancy>,

    pub purchase_order: Option<String>,
    pub payment: Option<PaymentSchedule>,
    pub reason: Option<String>,

    pub active_timer: Option<ActiveTimer>,
    pub pending_activity: Option<String>,
    pub activities_scheduled: u64,
    pub timers_started: u64,
    pub signals_received: u64,
    pub signals_rejected: u64,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
    pub last_seq: u64,
}

impl InstanceState {
    /// Starts a state from the trail's first entry.
    pub fn created(entry: &AuditEntry) -> Result<Self, TransitionError> {
        let AuditEvent::InstanceCreated {
            workflow_type,
            payload,
        } = entry.event()
        else {
            return Err(TransitionError::NotCreated(entry.action()));
        };
        if entry.seq() != 1 {
            return Err(TransitionError::SequenceGap {
                expected: 1,
                found: entry.seq(),
            });
        }

        Ok(Self {
            id: entry.instance_id(),
            workflow_type: *workflow_type,
            status: InstanceStatus::Created,
            payload: payload.clone(),
            stages: Vec::new(),
            current_index: 0,
            checks: Vec::new(),
            exceptions: Vec::new(),
            exception_administrator: None,
            discrepancies: Vec::new(),
            purchase_order: None,
            payment: None,
            reason: None,
            active_timer: None,
            pending_activity: None,
            activities_scheduled: 0,
            timers_started: 0,
            signals_received: 0,
            signals_rejected: 0,
            started_at: entry.timestamp(),
            ended_at: None,
            last_event_at: entry.timestamp(),
            last_seq: 1,
        })
    }

    /// Folds a complete trail into state without running any workflow code.
    pub fn replay(entries: &[AuditEntry]) -> Result<Self, TransitionError> {
        let (first, rest) = entries.split_first().ok_or(TransitionError::EmptyTrail)?;
        let mut state = Self::created(first)?;
        for entry in rest {
            state.apply(entry)?;
        }
        Ok(state)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The stage currently waiting for a decision, if any.
    pub fn current_stage(&self) -> Option<&StageState> {
        if self.is_terminal() {
            return None;
        }
        self.stages
            .get(self.current_index)
            .filter(|stage| stage.status == StageStatus::Active)
    }

    /// Actors whose signal would currently change state.
    pub fn pending_approvers(&self) -> Vec<String> {
        if self.is_terminal() {
            return Vec::new();
        }
        if let Some(stage) = self.current_stage() {
            return stage.authorized_actors().into_iter().collect();
        }

        let mut approvers: Vec<String> = self
            .exceptions
            .iter()
            .filter(|exception| exception.is_pending())
            .map(|exception| exception.approver.clone())
            .collect();
        if approvers.is_empty() {
            return approvers;
        }
        approvers.extend(self.exception_administrator.iter().cloned());
        approvers.sort();
        approvers.dedup();
        approvers
    }

    /// Stages approved so far, in chain order.
    pub fn completed_approvals(&self) -> Vec<&StageState> {
        self.stages
            .iter()
            .filter(|stage| stage.status == StageStatus::Approved)
            .collect()
    }

    pub fn exception(&self, id: &str) -> Option<&ExceptionCase> {
        self.exceptions.iter().find(|exception| exception.id == id)
    }

    /// Sum of adjustments on approved exception resolutions.
    pub fn approved_adjustments(&self) -> Decimal {
        self.exceptions
            .iter()
            .filter(|exception| exception.status == ExceptionStatus::Approved)
            .filter_map(|exception| exception.resolution.as_ref()?.adjustment)
            .sum()
    }

    pub fn apply(&mut self, entry: &AuditEntry) -> Result<(), TransitionError> {
        if entry.instance_id() != self.id {
            return Err(TransitionError::WrongInstance {
                expected: self.id,
                found: entry.instance_id(),
            });
        }
        if entry.seq() != self.last_seq + 1 {
            return Err(TransitionError::SequenceGap {
                expected: self.last_seq + 1,
                found: entry.seq(),
            });
        }

        match entry.event() {
            AuditEvent::InstanceCreated { .. } => return Err(TransitionError::AlreadyCreated),

            AuditEvent::StatusChanged { status } => self.transition(*status)?,

            AuditEvent::ActivityScheduled { key, .. } => {
                self.activities_scheduled += 1;
                self.pending_activity = Some(key.clone());
            }
            AuditEvent::ActivityCompleted { .. } | AuditEvent::ActivityFailed { .. } => {
                self.pending_activity = None;
            }

            AuditEvent::TimerStarted { .. } => {
                self.timers_started += 1;
                self.active_timer = entry.event().started_timer();
            }
            AuditEvent::TimerFired { timer_id, .. } => {
                if self.active_timer.map(|t| t.timer_id) == Some(*timer_id) {
                    self.active_timer = None;
                }
            }

            AuditEvent::SignalReceived { .. } => self.signals_received += 1,
            AuditEvent::SignalRejected { .. } => self.signals_rejected += 1,

            AuditEvent::CheckCompleted { record } => self.checks.push(record.clone()),

            AuditEvent::StagesPlanned { stages } => {
                self.stages = stages.iter().cloned().map(StageState::new).collect();
                self.current_index = 0;
            }
            AuditEvent::StageActivated { index } => {
                self.advance_to(*index)?;
                self.stage_mut(*index)?.status = StageStatus::Active;
            }
            AuditEvent::StageSkipped { index, .. } => {
                self.advance_to(*index)?;
                self.stage_mut(*index)?.status = StageStatus::Skipped;
            }
            AuditEvent::StageApproved {
                index,
                actor,
                comment,
            } => self.decide(*index, StageStatus::Approved, actor, comment.clone())?,
            AuditEvent::StageRejected {
                index,
                actor,
                reason,
            } => self.decide(*index, StageStatus::Rejected, actor, Some(reason.clone()))?,
            AuditEvent::StageReturned {
                index,
                actor,
                reason,
                ..
            } => self.decide(*index, StageStatus::Returned, actor, Some(reason.clone()))?,
            AuditEvent::Delegated { index, to, .. } => {
                self.stage_mut(*index)?.delegates.insert(to.clone());
            }
            AuditEvent::ReminderSent { index, count } => {
                self.stage_mut(*index)?.reminders_sent = *count;
            }
            AuditEvent::Escalated { index, escalate_to } => {
                let stage = self.stage_mut(*index)?;
                stage.escalated = true;
                stage.escalated_to = escalate_to.clone();
            }
            AuditEvent::AdministratorNotified {
                administrator,
                index,
            } => match index {
                Some(index) => self.stage_mut(*index)?.administrator = Some(administrator.clone()),
                None => self.exception_administrator = Some(administrator.clone()),
            },

            AuditEvent::ExceptionRaised { exception } => self.exceptions.push(exception.clone()),
            AuditEvent::ExceptionResolved {
                exception_id,
                resolution,
            } => {
                let exception = self
                    .exceptions
                    .iter_mut()
                    .find(|exception| &exception.id == exception_id)
                    .ok_or_else(|| TransitionError::UnknownException(exception_id.clone()))?;
                if !exception.is_pending() {
                    return Err(TransitionError::ExceptionAlreadyResolved(exception_id.clone()));
                }
                exception.status = resolution.action.into();
                exception.resolution = Some(resolution.clone());
            }
            AuditEvent::ExceptionsTimedOut { .. } => {}

            AuditEvent::DiscrepanciesFound { discrepancies } => {
                self.discrepancies.extend(discrepancies.iter().cloned());
            }
            AuditEvent::DisputeOpened {
                exception_id,
                dispute_id,
            } => {
                let exception = self
                    .exceptions
                    .iter_mut()
                    .find(|exception| &exception.id == exception_id)
                    .ok_or_else(|| TransitionError::UnknownException(exception_id.clone()))?;
                exception.dispute_id = Some(dispute_id.clone());
            }
            AuditEvent::PurchaseOrderIssued { po_number } => {
                self.purchase_order = Some(po_number.clone());
            }
            AuditEvent::PaymentScheduled { schedule } => self.payment = Some(schedule.clone()),

            AuditEvent::Terminated { status, reason } => {
                if !self.workflow_type.accepts_terminal(*status) {
                    return Err(TransitionError::ForeignTerminal {
                        workflow_type: self.workflow_type,
                        status: *status,
                    });
                }
                self.transition(*status)?;
                self.reason = reason.clone();
                self.ended_at = Some(entry.timestamp());
                self.active_timer = None;
            }
        }

        self.last_seq = entry.seq();
        self.last_event_at = entry.timestamp();
        Ok(())
    }

    fn transition(&mut self, next: InstanceStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn stage_mut(&mut self, index: usize) -> Result<&mut StageState, TransitionError> {
        self.stages
            .get_mut(index)
            .ok_or(TransitionError::UnknownStage(index))
    }

    fn advance_to(&mut self, index: usize) -> Result<(), TransitionError> {
        if index < self.current_index {
            return Err(TransitionError::StageRegression {
                current: self.current_index,
                requested: index,
            });
        }
        self.current_index = index;
        Ok(())
    }

    fn decide(
        &mut self,
        index: usize,
        status: StageStatus,
        actor: &str,
        comment: Option<String>,
    ) -> Result<(), TransitionError> {
        let stage = self.stage_mut(index)?;
        if stage.status.is_decided() {
            return Err(TransitionError::StageAlreadyDecided(index));
        }
        stage.status = status;
        stage.decision = Some(StageDecision {
            actor: actor.to_string(),
            comment,
        });
        Ok(())
    }

    /// Approval/rejection summary used in logs.
    pub(crate) fn resolution_counts(&self) -> (usize, usize) {
        let approved = self
            .exceptions
            .iter()
            .filter(|e| e.status == ExceptionStatus::Approved)
            .count();
        let rejected = self
            .exceptions
            .iter()
            .filter(|e| e.status == ExceptionStatus::Rejected)
            .count();
        (approved, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FundingSource, Requisition, Stage, Urgency};

    fn trail(events: Vec<AuditEvent>) -> Vec<AuditEntry> {
        let id = Uuid::new_v4();
        let start = Utc::now();
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                let at = start + chrono::Duration::seconds(i as i64);
                AuditEntry::new(id, i as u64 + 1, at, event)
            })
            .collect()
    }

    fn created() -> AuditEvent {
        AuditEvent::InstanceCreated {
            workflow_type: WorkflowType::Approval,
            payload: DomainPayload::Requisition(Requisition {
                requisition_id: "REQ-9".into(),
                requester_id: "alice".into(),
                department: "physics".into(),
                budget_code: "PHY-1".into(),
                vendor_id: "V-1".into(),
                category: "equipment".into(),
                total: Decimal::from(30_000),
                funding: FundingSource::Institutional,
                urgency: Urgency::Standard,
                line_items: vec![],
                quote_count: 3,
                sole_source_justification: None,
            }),
        }
    }

    fn two_stages() -> AuditEvent {
        AuditEvent::StagesPlanned {
            stages: vec![
                Stage::new(1, "supervisor", "Supervisor", "sam"),
                Stage::new(2, "department_head", "Department head", "dana"),
            ],
        }
    }

    #[test]
    fn test_replay_folds_stage_decisions() {
        let entries = trail(vec![
            created(),
            two_stages(),
            AuditEvent::StatusChanged {
                status: InstanceStatus::AwaitingApproval,
            },
            AuditEvent::StageActivated { index: 0 },
            AuditEvent::StageApproved {
                index: 0,
                actor: "sam".into(),
                comment: None,
            },
            AuditEvent::StageActivated { index: 1 },
            AuditEvent::Delegated {
                index: 1,
                from: "dana".into(),
                to: "dev".into(),
                reason: "travel".into(),
            },
        ]);

        let state = InstanceState::replay(&entries).unwrap();
        assert_eq!(state.status, InstanceStatus::AwaitingApproval);
        assert_eq!(state.completed_approvals().len(), 1);
        assert_eq!(state.current_stage().unwrap().stage.role, "department_head");
        assert_eq!(state.pending_approvers(), vec!["dana", "dev"]);
        assert_eq!(state.last_seq, 7);
    }

    #[test]
    fn test_second_decision_for_a_stage_is_refused() {
        let entries = trail(vec![
            created(),
            two_stages(),
            AuditEvent::StageActivated { index: 0 },
            AuditEvent::StageApproved {
                index: 0,
                actor: "sam".into(),
                comment: None,
            },
            AuditEvent::StageRejected {
                index: 0,
                actor: "sam".into(),
                reason: "changed my mind".into(),
            },
        ]);

        assert_eq!(
            InstanceState::replay(&entries),
            Err(TransitionError::StageAlreadyDecided(0))
        );
    }

    #[test]
    fn test_stage_index_never_moves_back() {
        let entries = trail(vec![
            created(),
            two_stages(),
            AuditEvent::StageActivated { index: 1 },
            AuditEvent::StageActivated { index: 0 },
        ]);
        assert!(matches!(
            InstanceState::replay(&entries),
            Err(TransitionError::StageRegression { .. })
        ));
    }

    #[test]
    fn test_terminal_status_must_belong_to_workflow() {
        let entries = trail(vec![
            created(),
            AuditEvent::Terminated {
                status: InstanceStatus::Matched,
                reason: None,
            },
        ]);
        assert!(matches!(
            InstanceState::replay(&entries),
            Err(TransitionError::ForeignTerminal { .. })
        ));
    }

    #[test]
    fn test_nothing_follows_a_terminal_status() {
        let entries = trail(vec![
            created(),
            AuditEvent::Terminated {
                status: InstanceStatus::Cancelled,
                reason: Some("duplicate".into()),
            },
            AuditEvent::StatusChanged {
                status: InstanceStatus::AwaitingApproval,
            },
        ]);
        assert!(matches!(
            InstanceState::replay(&entries),
            Err(TransitionError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_sequence_gaps_are_detected() {
        let mut entries = trail(vec![created(), two_stages()]);
        let id = entries[0].instance_id();
        entries.push(AuditEntry::new(
            id,
            5,
            Utc::now(),
            AuditEvent::StageActivated { index: 0 },
        ));
        assert_eq!(
            InstanceState::replay(&entries),
            Err(TransitionError::SequenceGap {
                expected: 3,
                found: 5
            })
        );
    }
}
