//! In-process implementation of every activity contract.
//!
//! `DirectoryActivities` stands in for the organisation directory, vendor
//! registry, ERP and mail relay. It keeps everything in memory, honours
//! idempotency keys for side-effecting calls, and can be scripted to fail or
//! stall, which is how the retry, timeout and recovery paths are exercised.

use super::{
    ActivityCall, ActivityError, ActivityInvocation, ActivityInvoker, BudgetCheck,
    DebarmentStatus, DisputeTicket, LineVariance, PaymentConfirmation, PolicyFinding,
    RegistrationStatus, Result, VendorCompliance,
};
use crate::audit::AuditEntry;
use crate::model::{
    EscalationPolicy, FundingSource, LineItem, PurchaseOrder, Receipt, Requisition, Stage, Urgency,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Approvers for one department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub supervisor: String,
    pub head: String,
    pub dean: String,
}

impl Department {
    pub fn new(
        supervisor: impl Into<String>,
        head: impl Into<String>,
        dean: impl Into<String>,
    ) -> Self {
        Self {
            supervisor: supervisor.into(),
            head: head.into(),
            dean: dean.into(),
        }
    }
}

/// Category that inserts a specialist review after the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistRule {
    pub approver: String,
    /// The specialist stage only activates at or above this amount.
    pub min_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VendorRecord {
    pub vendor_id: String,
    pub approved: bool,
    pub registered: bool,
    pub debarred: bool,
    pub issues: Vec<String>,
}

impl VendorRecord {
    /// An approved, registered, non-debarred vendor.
    pub fn in_good_standing(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            approved: true,
            registered: true,
            debarred: false,
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub instance_id: Uuid,
    pub kind: &'static str,
    pub recipient: String,
    pub subject: String,
}

/// Thresholds for the approval chain. Each role is required when the amount
/// is strictly above its threshold.
#[derive(Debug, Clone)]
struct ChainThresholds {
    supervisor: Decimal,
    department_head: Decimal,
    dean: Decimal,
    provost: Decimal,
}

impl Default for ChainThresholds {
    fn default() -> Self {
        Self {
            supervisor: Decimal::from(5_000),
            department_head: Decimal::from(25_000),
            dean: Decimal::from(100_000),
            provost: Decimal::from(500_000),
        }
    }
}

pub struct DirectoryActivities {
    departments: HashMap<String, Department>,
    provost: String,
    administrator: String,
    specialists: HashMap<String, SpecialistRule>,
    thresholds: ChainThresholds,
    escalation: EscalationPolicy,
    controlled_categories: Vec<String>,
    emergency_review_above: Decimal,

    vendors: DashMap<String, VendorRecord>,
    budgets: DashMap<String, Decimal>,
    purchase_orders: DashMap<String, PurchaseOrder>,
    receipts: DashMap<String, Receipt>,
    requisition_status: DashMap<String, String>,
    payments: DashMap<String, (String, Decimal)>,
    archive: DashMap<Uuid, Vec<AuditEntry>>,
    outbox: Mutex<Vec<Notification>>,

    effects: DashMap<String, serde_json::Value>,
    calls: DashMap<&'static str, usize>,
    failures: DashMap<&'static str, VecDeque<ActivityError>>,
    latencies: DashMap<&'static str, Duration>,
    sequence: AtomicU64,
}

impl Default for DirectoryActivities {
    fn default() -> Self {
        Self {
            departments: HashMap::new(),
            provost: "provost".to_string(),
            administrator: "procurement.admin".to_string(),
            specialists: HashMap::new(),
            thresholds: ChainThresholds::default(),
            escalation: EscalationPolicy::default(),
            controlled_categories: vec![
                "hazardous_materials".to_string(),
                "controlled_substances".to_string(),
            ],
            emergency_review_above: Decimal::from(50_000),
            vendors: DashMap::new(),
            budgets: DashMap::new(),
            purchase_orders: DashMap::new(),
            receipts: DashMap::new(),
            requisition_status: DashMap::new(),
            payments: DashMap::new(),
            archive: DashMap::new(),
            outbox: Mutex::new(Vec::new()),
            effects: DashMap::new(),
            calls: DashMap::new(),
            failures: DashMap::new(),
            latencies: DashMap::new(),
            sequence: AtomicU64::new(1000),
        }
    }
}

impl DirectoryActivities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_department(mut self, name: impl Into<String>, department: Department) -> Self {
        self.departments.insert(name.into(), department);
        self
    }

    pub fn with_provost(mut self, provost: impl Into<String>) -> Self {
        self.provost = provost.into();
        self
    }

    pub fn with_administrator(mut self, administrator: impl Into<String>) -> Self {
        self.administrator = administrator.into();
        self
    }

    pub fn with_specialist(mut self, category: impl Into<String>, rule: SpecialistRule) -> Self {
        self.specialists.insert(category.into(), rule);
        self
    }

    /// Escalation policy stamped on every planned stage.
    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_vendor(self, vendor: VendorRecord) -> Self {
        self.vendors.insert(vendor.vendor_id.clone(), vendor);
        self
    }

    pub fn with_budget(self, budget_code: impl Into<String>, remaining: Decimal) -> Self {
        self.budgets.insert(budget_code.into(), remaining);
        self
    }

    pub fn with_purchase_order(self, po: PurchaseOrder) -> Self {
        self.purchase_orders.insert(po.po_number.clone(), po);
        self
    }

    pub fn with_receipt(self, receipt: Receipt) -> Self {
        self.receipts.insert(receipt.po_number.clone(), receipt);
        self
    }

    /// The next `times` attempts of `activity` fail with `error`.
    pub fn fail_next(&self, activity: &'static str, times: usize, error: ActivityError) {
        let mut queue = self.failures.entry(activity).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every attempt of `activity` sleeps this long before answering.
    pub fn set_latency(&self, activity: &'static str, latency: Duration) {
        self.latencies.insert(activity, latency);
    }

    pub fn clear_latency(&self, activity: &'static str) {
        self.latencies.remove(activity);
    }

    /// Number of attempts made against `activity`, successful or not.
    pub fn attempts(&self, activity: &str) -> usize {
        self.calls.get(activity).map(|n| *n).unwrap_or(0)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn notifications_for(&self, recipient: &str) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }

    pub fn purchase_order(&self, po_number: &str) -> Option<PurchaseOrder> {
        self.purchase_orders.get(po_number).map(|po| po.clone())
    }

    pub fn requisition_status(&self, requisition_id: &str) -> Option<String> {
        self.requisition_status
            .get(requisition_id)
            .map(|status| status.clone())
    }

    /// Payments scheduled so far as `(payment_id, invoice_id, amount)`.
    pub fn payments(&self) -> Vec<(String, String, Decimal)> {
        let mut payments: Vec<_> = self
            .payments
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().0.clone(), entry.value().1))
            .collect();
        payments.sort();
        payments
    }

    pub fn archived_trail(&self, instance_id: Uuid) -> Option<Vec<AuditEntry>> {
        self.archive.get(&instance_id).map(|trail| trail.clone())
    }

    fn next_number(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    fn notify(&self, instance_id: Uuid, kind: &'static str, recipient: &str, subject: &str) {
        debug!("Notify {}: instance={}, to={}, {}", kind, instance_id, recipient, subject);
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Notification {
                instance_id,
                kind,
                recipient: recipient.to_string(),
                subject: subject.to_string(),
            });
    }

    fn vendor(&self, vendor_id: &str) -> Result<VendorRecord> {
        self.vendors
            .get(vendor_id)
            .map(|vendor| vendor.clone())
            .ok_or_else(|| ActivityError::NotFound(format!("vendor {}", vendor_id)))
    }

    fn approval_chain(
        &self,
        amount: Decimal,
        category: &str,
        funding: &FundingSource,
        department: &str,
    ) -> Result<Vec<Stage>> {
        let dept = self
            .departments
            .get(department)
            .ok_or_else(|| ActivityError::NotFound(format!("department {}", department)))?;

        let mut stages: Vec<Stage> = Vec::new();
        let mut add = |role: &str,
                       name: &str,
                       approver: &str,
                       escalate_to: &str,
                       min_amount: Option<Decimal>| {
            let order = stages.len() as u32 + 1;
            let mut stage = Stage::new(order, role, name, approver)
                .with_escalation(self.escalation.clone().with_escalate_to(escalate_to));
            if let Some(min) = min_amount {
                stage = stage.with_min_amount(min);
            }
            stages.push(stage);
        };

        if let FundingSource::Grant(grant) = funding {
            add(
                "principal_investigator",
                "Principal investigator review",
                &grant.principal_investigator,
                &dept.head,
                None,
            );
        }
        if amount > self.thresholds.supervisor {
            add(
                "supervisor",
                "Supervisor approval",
                &dept.supervisor,
                &dept.head,
                None,
            );
        }
        if let Some(rule) = self.specialists.get(category) {
            add(
                "specialist",
                &format!("{} specialist review", category),
                &rule.approver,
                &dept.head,
                rule.min_amount,
            );
        }
        if amount > self.thresholds.department_head {
            add(
                "department_head",
                "Department head approval",
                &dept.head,
                &dept.dean,
                None,
            );
        }
        if amount > self.thresholds.dean {
            add("dean", "Dean approval", &dept.dean, &self.provost, None);
        }
        if amount > self.thresholds.provost {
            add(
                "provost",
                "Provost approval",
                &self.provost,
                &self.administrator,
                None,
            );
        }

        Ok(stages)
    }

    fn evaluate_policies(&self, requisition: &Requisition) -> Vec<PolicyFinding> {
        let mut findings = Vec::new();

        if requisition.urgency == Urgency::Emergency && requisition.total > self.emergency_review_above
        {
            findings.push(PolicyFinding {
                rule: "emergency_purchase".to_string(),
                description: format!(
                    "Emergency purchases above {} require compliance review",
                    self.emergency_review_above
                ),
            });
        }

        let controlled = std::iter::once(requisition.category.as_str())
            .chain(requisition.line_items.iter().filter_map(|l| l.category.as_deref()))
            .find(|category| self.controlled_categories.iter().any(|c| c == category));
        if let Some(category) = controlled {
            findings.push(PolicyFinding {
                rule: "controlled_category".to_string(),
                description: format!("Category {} requires safety office sign-off", category),
            });
        }

        findings
    }

    fn perform(&self, call: &ActivityCall) -> Result<serde_json::Value> {
        match call {
            ActivityCall::ValidateBudget {
                budget_code,
                amount,
            } => {
                if amount.is_sign_negative() {
                    return Err(ActivityError::InvalidInput(format!(
                        "negative amount {}",
                        amount
                    )));
                }
                let remaining = self
                    .budgets
                    .get(budget_code)
                    .map(|remaining| *remaining)
                    .ok_or_else(|| ActivityError::NotFound(format!("budget {}", budget_code)))?;
                to_output(&BudgetCheck {
                    available: remaining >= *amount,
                    remaining,
                })
            }
            ActivityCall::DetermineApprovalChain {
                amount,
                category,
                funding,
                department,
            } => to_output(&self.approval_chain(*amount, category, funding, department)?),
            ActivityCall::CheckVendorCompliance { vendor_id } => {
                let vendor = self.vendor(vendor_id)?;
                to_output(&VendorCompliance {
                    approved: vendor.approved,
                    issues: vendor.issues,
                })
            }
            ActivityCall::CheckRegistration { vendor_id } => {
                let vendor = self.vendor(vendor_id)?;
                to_output(&RegistrationStatus {
                    registered: vendor.registered,
                    expires_on: None,
                })
            }
            ActivityCall::CheckDebarment { vendor_id } => {
                let vendor = self.vendor(vendor_id)?;
                to_output(&DebarmentStatus {
                    debarred: vendor.debarred,
                    reason: vendor
                        .debarred
                        .then(|| "Listed on the federal exclusion list".to_string()),
                })
            }
            ActivityCall::EvaluatePolicies { requisition } => {
                to_output(&self.evaluate_policies(requisition))
            }
            ActivityCall::NotifyApprover {
                instance_id,
                recipient,
                subject,
                reminder,
            } => {
                let kind = if *reminder { "reminder" } else { "approval_request" };
                self.notify(*instance_id, kind, recipient, subject);
                Ok(serde_json::Value::Null)
            }
            ActivityCall::NotifyRequester {
                instance_id,
                recipient,
                subject,
            } => {
                self.notify(*instance_id, "requester_update", recipient, subject);
                Ok(serde_json::Value::Null)
            }
            ActivityCall::NotifyDelegate {
                instance_id,
                recipient,
                delegated_by,
                subject,
            } => {
                let subject = format!("{} (delegated by {})", subject, delegated_by);
                self.notify(*instance_id, "delegation", recipient, &subject);
                Ok(serde_json::Value::Null)
            }
            ActivityCall::NotifyAdministrator {
                instance_id,
                recipient,
                subject,
            } => {
                self.notify(*instance_id, "administrator", recipient, subject);
                Ok(serde_json::Value::Null)
            }
            ActivityCall::FindMatchingPo {
                vendor_id,
                po_number,
                amount,
            } => {
                let found = match po_number {
                    Some(po_number) => self.purchase_order(po_number),
                    None => self
                        .purchase_orders
                        .iter()
                        .find(|po| &po.vendor_id == vendor_id && po.total == *amount)
                        .map(|po| po.clone()),
                };
                to_output(&found)
            }
            ActivityCall::FindMatchingReceipt { po_number } => {
                let receipt = self.receipts.get(po_number).map(|r| r.clone());
                to_output(&receipt)
            }
            ActivityCall::VerifyQuantities {
                invoice_lines,
                receipt,
            } => to_output(&quantity_variances(invoice_lines, receipt)),
            ActivityCall::VerifyPricing {
                invoice_lines,
                purchase_order,
            } => to_output(&price_variances(invoice_lines, purchase_order)),
            ActivityCall::SchedulePayment {
                invoice_id, amount, ..
            } => {
                if amount.is_sign_negative() {
                    return Err(ActivityError::InvalidInput(format!(
                        "negative payment {}",
                        amount
                    )));
                }
                let payment_id = self.next_number("PAY");
                self.payments
                    .insert(payment_id.clone(), (invoice_id.clone(), *amount));
                to_output(&PaymentConfirmation { payment_id })
            }
            ActivityCall::CreateVendorDispute { .. } => to_output(&DisputeTicket {
                dispute_id: self.next_number("DSP"),
            }),
            ActivityCall::GeneratePurchaseOrder {
                vendor_id,
                amount,
                line_items,
                ..
            } => {
                let po_number = self.next_number("PO");
                self.purchase_orders.insert(
                    po_number.clone(),
                    PurchaseOrder {
                        po_number: po_number.clone(),
                        vendor_id: vendor_id.clone(),
                        total: *amount,
                        line_items: line_items.clone(),
                    },
                );
                to_output(&po_number)
            }
            ActivityCall::UpdateRequisitionStatus {
                requisition_id,
                status,
            } => {
                self.requisition_status
                    .insert(requisition_id.clone(), status.clone());
                Ok(serde_json::Value::Null)
            }
            ActivityCall::RecordAuditEvent {
                instance_id,
                entries,
                ..
            } => {
                self.archive.insert(*instance_id, entries.clone());
                Ok(serde_json::Value::Null)
            }
        }
    }
}

#[async_trait]
impl ActivityInvoker for DirectoryActivities {
    async fn invoke(&self, invocation: &ActivityInvocation) -> Result<serde_json::Value> {
        *self.calls.entry(invocation.name).or_insert(0) += 1;

        let latency = self.latencies.get(invocation.name).map(|latency| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .failures
            .get_mut(invocation.name)
            .and_then(|mut queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        if !invocation.input.is_side_effecting() {
            return self.perform(&invocation.input);
        }

        // The entry lock is held across the effect so a concurrent duplicate
        // waits and then sees the first result.
        match self.effects.entry(invocation.idempotency_key.clone()) {
            Entry::Occupied(done) => {
                debug!(
                    "Duplicate invocation suppressed: key={}",
                    invocation.idempotency_key
                );
                Ok(done.get().clone())
            }
            Entry::Vacant(slot) => {
                let output = self.perform(&invocation.input)?;
                slot.insert(output.clone());
                Ok(output)
            }
        }
    }
}

fn to_output<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ActivityError::Failed(e.to_string()))
}

fn quantity_variances(invoice_lines: &[LineItem], receipt: &Receipt) -> Vec<LineVariance> {
    invoice_lines
        .iter()
        .filter_map(|line| {
            let received = receipt
                .lines
                .iter()
                .find(|r| r.line_id == line.line_id)
                .map_or(Decimal::ZERO, |r| r.quantity);
            (received != line.quantity).then(|| LineVariance {
                line_id: line.line_id.clone(),
                expected: received,
                actual: line.quantity,
            })
        })
        .collect()
}

fn price_variances(invoice_lines: &[LineItem], po: &PurchaseOrder) -> Vec<LineVariance> {
    invoice_lines
        .iter()
        .filter_map(|line| {
            let ordered = po
                .line_items
                .iter()
                .find(|l| l.line_id == line.line_id)
                .map_or(Decimal::ZERO, |l| l.unit_price);
            (ordered != line.unit_price).then(|| LineVariance {
                line_id: line.line_id.clone(),
                expected: ordered,
                actual: line.unit_price,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GrantFunding;
    use std::sync::Arc;

    fn directory() -> DirectoryActivities {
        DirectoryActivities::new()
            .with_department("physics", Department::new("sam", "dana", "erin"))
            .with_specialist(
                "it_equipment",
                SpecialistRule {
                    approver: "ivan".into(),
                    min_amount: Some(Decimal::from(10_000)),
                },
            )
    }

    fn roles(stages: &[Stage]) -> Vec<&str> {
        stages.iter().map(|s| s.role.as_str()).collect()
    }

    #[test]
    fn test_chain_thresholds() {
        let dir = directory();
        let chain = |amount: i64| {
            dir.approval_chain(
                Decimal::from(amount),
                "lab_supplies",
                &FundingSource::Institutional,
                "physics",
            )
            .unwrap()
        };

        assert!(chain(5_000).is_empty());
        assert_eq!(roles(&chain(30_000)), vec!["supervisor", "department_head"]);
        assert_eq!(
            roles(&chain(600_000)),
            vec!["supervisor", "department_head", "dean", "provost"]
        );

        let stages = chain(30_000);
        assert_eq!(stages[0].escalation.escalate_to.as_deref(), Some("dana"));
        assert_eq!(stages[1].escalation.escalate_to.as_deref(), Some("erin"));
    }

    #[test]
    fn test_grant_and_specialist_stages() {
        let dir = directory();
        let grant = FundingSource::Grant(GrantFunding {
            grant_id: "NSF-1".into(),
            principal_investigator: "pat".into(),
            federal: true,
        });

        let stages = dir
            .approval_chain(Decimal::from(8_000), "it_equipment", &grant, "physics")
            .unwrap();
        assert_eq!(
            roles(&stages),
            vec!["principal_investigator", "supervisor", "specialist"]
        );
        assert_eq!(stages[0].approver, "pat");
        assert!(!stages[2].applies_to(Decimal::from(8_000)));
        assert_eq!(
            stages.iter().map(|s| s.order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_unknown_department_is_permanent() {
        let err = directory()
            .approval_chain(
                Decimal::from(9_000),
                "x",
                &FundingSource::Institutional,
                "history",
            )
            .unwrap_err();
        assert!(matches!(err, ActivityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_side_effects_are_deduplicated_by_key() {
        let dir = directory();
        let invocation = ActivityInvocation::new(
            ActivityCall::NotifyRequester {
                instance_id: Uuid::nil(),
                recipient: "alice".into(),
                subject: "approved".into(),
            },
            "nil:4:notify_requester".into(),
        );

        dir.invoke(&invocation).await.unwrap();
        dir.invoke(&invocation).await.unwrap();

        assert_eq!(dir.attempts("notify_requester"), 2);
        assert_eq!(dir.notifications_for("alice").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_run_the_effect_once() {
        let dir = Arc::new(directory());
        let invocation = ActivityInvocation::new(
            ActivityCall::NotifyRequester {
                instance_id: Uuid::nil(),
                recipient: "alice".into(),
                subject: "approved".into(),
            },
            "nil:7:notify_requester".into(),
        );

        let mut calls = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let dir = Arc::clone(&dir);
            let invocation = invocation.clone();
            calls.spawn(async move { dir.invoke(&invocation).await });
        }
        while let Some(result) = calls.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(dir.attempts("notify_requester"), 16);
        assert_eq!(dir.notifications_for("alice").len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let dir = directory().with_vendor(VendorRecord::in_good_standing("V-1"));
        dir.fail_next(
            "check_debarment",
            1,
            ActivityError::Unavailable("registry offline".into()),
        );
        let invocation = ActivityInvocation::new(
            ActivityCall::CheckDebarment {
                vendor_id: "V-1".into(),
            },
            "k".into(),
        );

        assert!(dir.invoke(&invocation).await.is_err());
        let status: DebarmentStatus =
            serde_json::from_value(dir.invoke(&invocation).await.unwrap()).unwrap();
        assert!(!status.debarred);
    }

    #[test]
    fn test_line_comparisons() {
        let dec = |s: &str| s.parse::<Decimal>().unwrap();
        let invoice = vec![
            LineItem::new("1", "gloves", dec("10"), dec("5.10")),
            LineItem::new("2", "masks", dec("4"), dec("2.00")),
        ];
        let receipt = Receipt {
            receipt_id: "R-1".into(),
            po_number: "PO-1".into(),
            lines: vec![crate::model::ReceivedLine {
                line_id: "1".into(),
                quantity: dec("10"),
            }],
        };
        let po = PurchaseOrder {
            po_number: "PO-1".into(),
            vendor_id: "V-1".into(),
            total: dec("58"),
            line_items: vec![
                LineItem::new("1", "gloves", dec("10"), dec("5.00")),
                LineItem::new("2", "masks", dec("4"), dec("2.00")),
            ],
        };

        let qty = quantity_variances(&invoice, &receipt);
        assert_eq!(qty.len(), 1);
        assert_eq!(qty[0].line_id, "2");
        assert_eq!(qty[0].expected, Decimal::ZERO);

        let price = price_variances(&invoice, &po);
        assert_eq!(price.len(), 1);
        assert_eq!(price[0].ratio(), Some(dec("0.02")));
    }
}
