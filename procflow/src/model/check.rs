use serde::{Deserialize, Serialize};

use super::exception::ExceptionKind;

/// Compliance checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceCheck {
    GrantRestriction,
    SpendingThreshold,
    VendorStatus,
    CompetitiveBidding,
    PolicyEngine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRequest {
    pub kind: ExceptionKind,
    pub description: String,
    pub approver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    /// The check can be overridden by the named approver.
    ExceptionRequired { requests: Vec<ExceptionRequest> },
    /// Not overridable; the instance ends in `violation`.
    HardViolation { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub check: ComplianceCheck,
    pub outcome: CheckOutcome,
}

impl CheckRecord {
    pub fn passed(check: ComplianceCheck) -> Self {
        Self {
            check,
            outcome: CheckOutcome::Passed,
        }
    }

    pub fn hard_violation(check: ComplianceCheck, reason: impl Into<String>) -> Self {
        Self {
            check,
            outcome: CheckOutcome::HardViolation {
                reason: reason.into(),
            },
        }
    }

    pub fn requires(check: ComplianceCheck, requests: Vec<ExceptionRequest>) -> Self {
        if requests.is_empty() {
            return Self::passed(check);
        }
        Self {
            check,
            outcome: CheckOutcome::ExceptionRequired { requests },
        }
    }
}
