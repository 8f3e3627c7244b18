use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::ResolutionAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    GrantRestriction,
    SpendingThreshold,
    VendorCompliance,
    CompetitiveBidding,
    PolicyRule,
    Discrepancy,
    VendorDispute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Pending,
    Approved,
    Rejected,
    Disputed,
}

impl ExceptionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExceptionStatus::Pending)
    }
}

impl From<ResolutionAction> for ExceptionStatus {
    fn from(action: ResolutionAction) -> Self {
        match action {
            ResolutionAction::Approve => ExceptionStatus::Approved,
            ResolutionAction::Reject => ExceptionStatus::Rejected,
            ResolutionAction::Dispute => ExceptionStatus::Disputed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub actor: String,
    pub notes: Option<String>,
    pub adjustment: Option<Decimal>,
}

/// A bounded override request that blocks its instance until decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionCase {
    pub id: String,
    pub kind: ExceptionKind,
    pub description: String,
    pub approver: String,
    pub status: ExceptionStatus,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Discrepancy this case was raised for (reconciliation).
    #[serde(default)]
    pub discrepancy_id: Option<String>,
    /// Vendor dispute ticket opened when the case was disputed.
    #[serde(default)]
    pub dispute_id: Option<String>,
}

impl ExceptionCase {
    pub fn new(
        id: impl Into<String>,
        kind: ExceptionKind,
        description: impl Into<String>,
        approver: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            approver: approver.into(),
            status: ExceptionStatus::Pending,
            resolution: None,
            discrepancy_id: None,
            dispute_id: None,
        }
    }

    pub fn for_discrepancy(mut self, discrepancy_id: impl Into<String>) -> Self {
        self.discrepancy_id = Some(discrepancy_id.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ExceptionStatus::Pending
    }

    /// Text used when joining rejection reasons into a terminal reason.
    pub fn rejection_reason(&self) -> Option<String> {
        let resolution = self.resolution.as_ref()?;
        if self.status != ExceptionStatus::Rejected {
            return None;
        }
        Some(match &resolution.notes {
            Some(notes) => format!("{} rejected by {}: {}", self.id, resolution.actor, notes),
            None => format!("{} rejected by {}", self.id, resolution.actor),
        })
    }
}
