//! Audit trail vocabulary.
//!
//! Every state change of an instance is one [`AuditEvent`]. Events fall in two
//! groups that replay treats differently:
//!
//! - **Inputs** carry data the workflow could not have computed itself
//!   (activity results, timer deadlines, signals, timer fires). Replay feeds
//!   them back to the workflow instead of re-executing anything.
//! - **Derived** events are pure consequences of inputs. Replay recomputes
//!   them and checks the recomputation matches what was recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    ActiveTimer, CheckRecord, Discrepancy, DomainPayload, ExceptionCase, InstanceStatus,
    PaymentSchedule, Resolution, Signal, SignalKind, Stage, TimerPurpose, WorkflowType,
};

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "detail", rename_all = "snake_case")]
pub enum AuditEvent {
    InstanceCreated {
        workflow_type: WorkflowType,
        payload: DomainPayload,
    },
    StatusChanged {
        status: InstanceStatus,
    },

    ActivityScheduled {
        key: String,
        name: String,
        input: serde_json::Value,
        input_hash: u64,
    },
    ActivityCompleted {
        key: String,
        name: String,
        output: serde_json::Value,
        attempts: u32,
    },
    ActivityFailed {
        key: String,
        name: String,
        error: String,
        attempts: u32,
        retryable: bool,
    },

    TimerStarted {
        timer_id: u64,
        purpose: TimerPurpose,
        due_at: DateTime<Utc>,
    },
    TimerFired {
        timer_id: u64,
        purpose: TimerPurpose,
    },

    SignalReceived {
        signal: Signal,
        received_at: DateTime<Utc>,
    },
    SignalRejected {
        signal: SignalKind,
        actor: String,
        reason: String,
    },

    CheckCompleted {
        record: CheckRecord,
    },

    StagesPlanned {
        stages: Vec<Stage>,
    },
    StageActivated {
        index: usize,
    },
    StageSkipped {
        index: usize,
        reason: String,
    },
    StageApproved {
        index: usize,
        actor: String,
        comment: Option<String>,
    },
    StageRejected {
        index: usize,
        actor: String,
        reason: String,
    },
    StageReturned {
        index: usize,
        actor: String,
        reason: String,
        return_to: String,
    },
    Delegated {
        index: usize,
        from: String,
        to: String,
        reason: String,
    },
    ReminderSent {
        index: usize,
        count: u32,
    },
    Escalated {
        index: usize,
        escalate_to: Option<String>,
    },
    /// `index` is the stage handed over, or `None` for the exception set.
    AdministratorNotified {
        administrator: String,
        index: Option<usize>,
    },

    ExceptionRaised {
        exception: ExceptionCase,
    },
    ExceptionResolved {
        exception_id: String,
        resolution: Resolution,
    },
    ExceptionsTimedOut {
        pending: Vec<String>,
    },

    DiscrepanciesFound {
        discrepancies: Vec<Discrepancy>,
    },
    DisputeOpened {
        exception_id: String,
        dispute_id: String,
    },
    PurchaseOrderIssued {
        po_number: String,
    },
    PaymentScheduled {
        schedule: PaymentSchedule,
    },

    Terminated {
        status: InstanceStatus,
        reason: Option<String>,
    },
}

impl AuditEvent {
    /// Snake-case action name, as stored in the `action` column.
    pub fn action(&self) -> &'static str {
        match self {
            AuditEvent::InstanceCreated { .. } => "instance_created",
            AuditEvent::StatusChanged { .. } => "status_changed",
            AuditEvent::ActivityScheduled { .. } => "activity_scheduled",
            AuditEvent::ActivityCompleted { .. } => "activity_completed",
            AuditEvent::ActivityFailed { .. } => "activity_failed",
            AuditEvent::TimerStarted { .. } => "timer_started",
            AuditEvent::TimerFired { .. } => "timer_fired",
            AuditEvent::SignalReceived { .. } => "signal_received",
            AuditEvent::SignalRejected { .. } => "signal_rejected",
            AuditEvent::CheckCompleted { .. } => "check_completed",
            AuditEvent::StagesPlanned { .. } => "stages_planned",
            AuditEvent::StageActivated { .. } => "stage_activated",
            AuditEvent::StageSkipped { .. } => "stage_skipped",
            AuditEvent::StageApproved { .. } => "stage_approved",
            AuditEvent::StageRejected { .. } => "stage_rejected",
            AuditEvent::StageReturned { .. } => "stage_returned",
            AuditEvent::Delegated { .. } => "delegated",
            AuditEvent::ReminderSent { .. } => "reminder_sent",
            AuditEvent::Escalated { .. } => "escalated",
            AuditEvent::AdministratorNotified { .. } => "administrator_notified",
            AuditEvent::ExceptionRaised { .. } => "exception_raised",
            AuditEvent::ExceptionResolved { .. } => "exception_resolved",
            AuditEvent::ExceptionsTimedOut { .. } => "exceptions_timed_out",
            AuditEvent::DiscrepanciesFound { .. } => "discrepancies_found",
            AuditEvent::DisputeOpened { .. } => "dispute_opened",
            AuditEvent::PurchaseOrderIssued { .. } => "purchase_order_issued",
            AuditEvent::PaymentScheduled { .. } => "payment_scheduled",
            AuditEvent::Terminated { .. } => "terminated",
        }
    }

    /// Whether replay takes this event from history rather than recomputing it.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            AuditEvent::ActivityCompleted { .. }
                | AuditEvent::ActivityFailed { .. }
                | AuditEvent::TimerStarted { .. }
                | AuditEvent::TimerFired { .. }
                | AuditEvent::SignalReceived { .. }
        )
    }

    pub fn actor(&self) -> &str {
        match self {
            AuditEvent::SignalReceived { signal, .. } => signal.actor(),
            AuditEvent::SignalRejected { actor, .. }
            | AuditEvent::StageApproved { actor, .. }
            | AuditEvent::StageRejected { actor, .. }
            | AuditEvent::StageReturned { actor, .. } => actor,
            AuditEvent::Delegated { from, .. } => from,
            AuditEvent::ExceptionResolved { resolution, .. } => &resolution.actor,
            _ => SYSTEM_ACTOR,
        }
    }

    pub fn started_timer(&self) -> Option<ActiveTimer> {
        match self {
            AuditEvent::TimerStarted {
                timer_id,
                purpose,
                due_at,
            } => Some(ActiveTimer {
                timer_id: *timer_id,
                purpose: *purpose,
                due_at: *due_at,
            }),
            _ => None,
        }
    }
}

/// One immutable line of an instance's audit trail.
///
/// Fields are private: an entry is built once by the runtime and afterwards
/// only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    instance_id: Uuid,
    seq: u64,
    timestamp: DateTime<Utc>,
    actor: String,
    event: AuditEvent,
}

impl AuditEntry {
    pub fn new(instance_id: Uuid, seq: u64, timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            instance_id,
            seq,
            timestamp,
            actor: event.actor().to_string(),
            event,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// 1-based position in the trail.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn action(&self) -> &'static str {
        self.event.action()
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn into_event(self) -> AuditEvent {
        self.event
    }

    /// The structured detail payload, as stored next to the action name.
    pub fn detail(&self) -> serde_json::Value {
        match serde_json::to_value(&self.event) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("detail").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// Rebuilds an entry from its stored columns.
    pub(crate) fn from_parts(
        instance_id: Uuid,
        seq: u64,
        timestamp: DateTime<Utc>,
        actor: String,
        action: &str,
        detail: serde_json::Value,
    ) -> crate::core::Result<Self> {
        let event: AuditEvent = crate::core::from_json(serde_json::json!({
            "action": action,
            "detail": detail,
        }))?;
        Ok(Self {
            instance_id,
            seq,
            timestamp,
            actor,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_splits_into_action_and_detail() {
        let entry = AuditEntry::new(
            Uuid::new_v4(),
            7,
            Utc::now(),
            AuditEvent::StageApproved {
                index: 1,
                actor: "dean.smith".into(),
                comment: Some("fine".into()),
            },
        );

        assert_eq!(entry.action(), "stage_approved");
        assert_eq!(entry.actor(), "dean.smith");
        assert_eq!(entry.detail()["index"], 1);

        let rebuilt = AuditEntry::from_parts(
            entry.instance_id(),
            entry.seq(),
            entry.timestamp(),
            entry.actor().to_string(),
            entry.action(),
            entry.detail(),
        )
        .unwrap();
        assert_eq!(rebuilt, entry);
    }

    #[test]
    fn test_input_classification() {
        assert!(AuditEvent::TimerFired {
            timer_id: 1,
            purpose: TimerPurpose::ExceptionTimeout
        }
        .is_input());
        assert!(!AuditEvent::ReminderSent { index: 0, count: 1 }.is_input());
    }
}
