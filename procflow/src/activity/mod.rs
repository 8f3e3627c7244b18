//! Activity Invoker.
//!
//! Activities are the only place non-determinism enters a workflow: lookups
//! in systems of record, notifications, payments. The workflow describes a
//! call as an [`ActivityCall`]; the runtime wraps it in an
//! [`ActivityInvocation`] (idempotency key, timeout, retry policy) and hands
//! it to the [`ActivityInvoker`] injected into the engine.
//!
//! Invokers must tolerate duplicates. After a crash, an activity that was
//! scheduled but never recorded as completed is invoked again with the same
//! idempotency key.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

mod directory;
mod error;
mod invoke;

pub use directory::{Department, DirectoryActivities, Notification, SpecialistRule, VendorRecord};
pub use error::{ActivityError, Result};
pub use invoke::invoke_with_policy;

use crate::audit::AuditEntry;
use crate::core::RetryPolicy;
use crate::model::{
    FundingSource, InstanceStatus, LineItem, PurchaseOrder, Receipt, Requisition,
};

/// Typed request for every activity contract the workflows consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "activity", content = "input", rename_all = "snake_case")]
pub enum ActivityCall {
    ValidateBudget {
        budget_code: String,
        amount: Decimal,
    },
    DetermineApprovalChain {
        amount: Decimal,
        category: String,
        funding: FundingSource,
        department: String,
    },
    CheckVendorCompliance {
        vendor_id: String,
    },
    CheckRegistration {
        vendor_id: String,
    },
    CheckDebarment {
        vendor_id: String,
    },
    EvaluatePolicies {
        requisition: Requisition,
    },
    NotifyApprover {
        instance_id: Uuid,
        recipient: String,
        subject: String,
        reminder: bool,
    },
    NotifyRequester {
        instance_id: Uuid,
        recipient: String,
        subject: String,
    },
    NotifyDelegate {
        instance_id: Uuid,
        recipient: String,
        delegated_by: String,
        subject: String,
    },
    NotifyAdministrator {
        instance_id: Uuid,
        recipient: String,
        subject: String,
    },
    FindMatchingPo {
        vendor_id: String,
        po_number: Option<String>,
        amount: Decimal,
    },
    FindMatchingReceipt {
        po_number: String,
    },
    VerifyQuantities {
        invoice_lines: Vec<LineItem>,
        receipt: Receipt,
    },
    VerifyPricing {
        invoice_lines: Vec<LineItem>,
        purchase_order: PurchaseOrder,
    },
    SchedulePayment {
        invoice_id: String,
        vendor_id: String,
        amount: Decimal,
        payment_date: NaiveDate,
    },
    CreateVendorDispute {
        invoice_id: String,
        vendor_id: String,
        exception_id: String,
        description: String,
    },
    GeneratePurchaseOrder {
        requisition_id: String,
        vendor_id: String,
        amount: Decimal,
        line_items: Vec<LineItem>,
    },
    UpdateRequisitionStatus {
        requisition_id: String,
        status: String,
    },
    /// Hands a closed trail to permanent storage.
    RecordAuditEvent {
        instance_id: Uuid,
        status: InstanceStatus,
        entries: Vec<AuditEntry>,
    },
}

impl ActivityCall {
    pub fn name(&self) -> &'static str {
        match self {
            ActivityCall::ValidateBudget { .. } => "validate_budget",
            ActivityCall::DetermineApprovalChain { .. } => "determine_approval_chain",
            ActivityCall::CheckVendorCompliance { .. } => "check_vendor_compliance",
            ActivityCall::CheckRegistration { .. } => "check_registration",
            ActivityCall::CheckDebarment { .. } => "check_debarment",
            ActivityCall::EvaluatePolicies { .. } => "evaluate_policies",
            ActivityCall::NotifyApprover { .. } => "notify_approver",
            ActivityCall::NotifyRequester { .. } => "notify_requester",
            ActivityCall::NotifyDelegate { .. } => "notify_delegate",
            ActivityCall::NotifyAdministrator { .. } => "notify_administrator",
            ActivityCall::FindMatchingPo { .. } => "find_matching_po",
            ActivityCall::FindMatchingReceipt { .. } => "find_matching_receipt",
            ActivityCall::VerifyQuantities { .. } => "verify_quantities",
            ActivityCall::VerifyPricing { .. } => "verify_pricing",
            ActivityCall::SchedulePayment { .. } => "schedule_payment",
            ActivityCall::CreateVendorDispute { .. } => "create_vendor_dispute",
            ActivityCall::GeneratePurchaseOrder { .. } => "generate_purchase_order",
            ActivityCall::UpdateRequisitionStatus { .. } => "update_requisition_status",
            ActivityCall::RecordAuditEvent { .. } => "record_audit_event",
        }
    }

    /// Calls that change external state and therefore must be deduplicated
    /// by idempotency key.
    pub fn is_side_effecting(&self) -> bool {
        !matches!(
            self,
            ActivityCall::ValidateBudget { .. }
                | ActivityCall::DetermineApprovalChain { .. }
                | ActivityCall::CheckVendorCompliance { .. }
                | ActivityCall::CheckRegistration { .. }
                | ActivityCall::CheckDebarment { .. }
                | ActivityCall::EvaluatePolicies { .. }
                | ActivityCall::FindMatchingPo { .. }
                | ActivityCall::FindMatchingReceipt { .. }
                | ActivityCall::VerifyQuantities { .. }
                | ActivityCall::VerifyPricing { .. }
        )
    }
}

/// External call descriptor.
#[derive(Debug, Clone)]
pub struct ActivityInvocation {
    pub name: &'static str,
    pub input: ActivityCall,
    /// `{instance}:{activity seq}:{name}`; stable across replay and recovery.
    pub idempotency_key: String,
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ActivityInvocation {
    pub fn new(input: ActivityCall, idempotency_key: String) -> Self {
        Self {
            name: input.name(),
            input,
            idempotency_key,
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::STANDARD,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

/// Executes activities on behalf of the runtime.
///
/// Implementations perform a single attempt; retries and timeouts are
/// applied around them by [`invoke_with_policy`].
#[async_trait]
pub trait ActivityInvoker: Send + Sync {
    async fn invoke(&self, invocation: &ActivityInvocation) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub available: bool,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCompliance {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub registered: bool,
    #[serde(default)]
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebarmentStatus {
    pub debarred: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub rule: String,
    pub description: String,
}

/// Per-line mismatch between what the invoice says and what the system of
/// record says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineVariance {
    pub line_id: String,
    pub expected: Decimal,
    pub actual: Decimal,
}

impl LineVariance {
    /// Relative variance; `None` when nothing was expected at all.
    pub fn ratio(&self) -> Option<Decimal> {
        if self.expected.is_zero() {
            return None;
        }
        Some((self.actual - self.expected) / self.expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeTicket {
    pub dispute_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Retryable;

    #[test]
    fn test_error_classification() {
        assert!(ActivityError::Unavailable("erp down".into()).is_retryable());
        assert!(ActivityError::Timeout {
            activity: "check_debarment".into(),
            timeout: Duration::from_secs(30)
        }
        .is_retryable());
        assert!(!ActivityError::InvalidInput("negative amount".into()).is_retryable());
        assert!(!ActivityError::NotFound("department".into()).is_retryable());
    }

    #[test]
    fn test_call_names_match_wire_tags() {
        let call = ActivityCall::CheckDebarment {
            vendor_id: "V-1".into(),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["activity"], call.name());
        assert!(!call.is_side_effecting());

        let notify = ActivityCall::NotifyRequester {
            instance_id: Uuid::nil(),
            recipient: "alice".into(),
            subject: "approved".into(),
        };
        assert!(notify.is_side_effecting());
    }

    #[test]
    fn test_variance_ratio() {
        let variance = LineVariance {
            line_id: "1".into(),
            expected: Decimal::from(100),
            actual: Decimal::from(104),
        };
        assert_eq!(variance.ratio(), Some(Decimal::new(4, 2)));
        let unexpected = LineVariance {
            expected: Decimal::ZERO,
            ..variance
        };
        assert_eq!(unexpected.ratio(), None);
    }
}
