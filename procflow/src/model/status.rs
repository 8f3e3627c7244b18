use crate::core::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three workflow definitions the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Compliance,
    Approval,
    Reconciliation,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Compliance => "compliance",
            WorkflowType::Approval => "approval",
            WorkflowType::Reconciliation => "reconciliation",
        }
    }

    /// Business outcomes this workflow may end in.
    ///
    /// `Cancelled` and `Failed` are reachable from every workflow on top of
    /// these (cancel signal, non-retryable activity failure).
    pub fn terminal_statuses(&self) -> &'static [InstanceStatus] {
        use InstanceStatus::*;
        match self {
            WorkflowType::Compliance => {
                &[Compliant, Violation, ExceptionPending, ExceptionApproved]
            }
            WorkflowType::Approval => &[Approved, Rejected, Returned, Cancelled],
            WorkflowType::Reconciliation => &[Matched, Exception, Disputed, Rejected],
        }
    }

    /// Whether `status` is a legal terminal status for this workflow.
    pub fn accepts_terminal(&self, status: InstanceStatus) -> bool {
        matches!(status, InstanceStatus::Cancelled | InstanceStatus::Failed)
            || self.terminal_statuses().contains(&status)
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compliance" => Ok(WorkflowType::Compliance),
            "approval" => Ok(WorkflowType::Approval),
            "reconciliation" => Ok(WorkflowType::Reconciliation),
            other => Err(Error::InvalidWorkflowType(other.to_string())),
        }
    }
}

/// Lifecycle status of an instance.
///
/// Non-terminal statuses are ordered by phase; an instance only ever moves to
/// a status of equal or later phase. Terminal statuses are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Checking,
    Matching,
    AwaitingApproval,
    AwaitingExceptions,
    AwaitingDispute,
    SchedulingPayment,

    Compliant,
    Violation,
    ExceptionPending,
    ExceptionApproved,
    Approved,
    Rejected,
    Returned,
    Cancelled,
    Matched,
    Exception,
    Disputed,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        self.phase() == u8::MAX
    }

    fn phase(&self) -> u8 {
        use InstanceStatus::*;
        match self {
            Created => 0,
            Checking | Matching => 1,
            AwaitingApproval | AwaitingExceptions => 2,
            AwaitingDispute => 3,
            SchedulingPayment => 4,
            _ => u8::MAX,
        }
    }

    /// Forward-only transition rule.
    ///
    /// Returning a requisition for revision ends the instance in `Returned`,
    /// so there is no backward edge to model.
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        !self.is_terminal() && next.phase() >= self.phase()
    }

    pub fn as_str(&self) -> &'static str {
        use InstanceStatus::*;
        match self {
            Created => "created",
            Checking => "checking",
            Matching => "matching",
            AwaitingApproval => "awaiting_approval",
            AwaitingExceptions => "awaiting_exceptions",
            AwaitingDispute => "awaiting_dispute",
            SchedulingPayment => "scheduling_payment",
            Compliant => "compliant",
            Violation => "violation",
            ExceptionPending => "exception_pending",
            ExceptionApproved => "exception_approved",
            Approved => "approved",
            Rejected => "rejected",
            Returned => "returned",
            Cancelled => "cancelled",
            Matched => "matched",
            Exception => "exception",
            Disputed => "disputed",
            Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use InstanceStatus::*;
        let status = match s {
            "created" => Created,
            "checking" => Checking,
            "matching" => Matching,
            "awaiting_approval" => AwaitingApproval,
            "awaiting_exceptions" => AwaitingExceptions,
            "awaiting_dispute" => AwaitingDispute,
            "scheduling_payment" => SchedulingPayment,
            "compliant" => Compliant,
            "violation" => Violation,
            "exception_pending" => ExceptionPending,
            "exception_approved" => ExceptionApproved,
            "approved" => Approved,
            "rejected" => Rejected,
            "returned" => Returned,
            "cancelled" => Cancelled,
            "matched" => Matched,
            "exception" => Exception,
            "disputed" => Disputed,
            "failed" => Failed,
            other => return Err(Error::InvalidStatus(other.to_string())),
        };
        Ok(status)
    }
}
