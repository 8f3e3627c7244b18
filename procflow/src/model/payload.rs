//! Business documents that trigger instances: requisitions and invoices,
//! plus the purchase orders and receipts the reconciliation match reads.

use crate::core::Error;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::status::WorkflowType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub category: Option<String>,
}

impl LineItem {
    pub fn new(
        line_id: impl Into<String>,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            description: description.into(),
            quantity,
            unit_price,
            category: None,
        }
    }

    pub fn extended(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantFunding {
    pub grant_id: String,
    pub principal_investigator: String,
    /// Federal awards require an active vendor registration.
    pub federal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FundingSource {
    Institutional,
    Grant(GrantFunding),
}

impl FundingSource {
    pub fn grant(&self) -> Option<&GrantFunding> {
        match self {
            FundingSource::Grant(grant) => Some(grant),
            FundingSource::Institutional => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Standard,
    Rush,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requisition {
    pub requisition_id: String,
    pub requester_id: String,
    pub department: String,
    pub budget_code: String,
    pub vendor_id: String,
    pub category: String,
    pub total: Decimal,
    pub funding: FundingSource,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Number of competitive quotes attached to the requisition.
    #[serde(default)]
    pub quote_count: u32,
    #[serde(default)]
    pub sole_source_justification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub invoice_number: String,
    pub vendor_id: String,
    #[serde(default)]
    pub po_number: Option<String>,
    pub invoice_date: NaiveDate,
    pub total: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub terms: Option<PaymentTerms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub po_number: String,
    pub vendor_id: String,
    pub total: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_id: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub po_number: String,
    pub lines: Vec<ReceivedLine>,
}

/// Early-payment discount and net terms, e.g. `2/10 net 30`: 2% off when
/// paid within 10 days, otherwise due in 30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub discount_percent: Decimal,
    pub discount_days: u32,
    pub net_days: u32,
}

impl PaymentTerms {
    pub fn net(net_days: u32) -> Self {
        Self {
            discount_percent: Decimal::ZERO,
            discount_days: 0,
            net_days,
        }
    }

    pub fn has_discount(&self) -> bool {
        self.discount_percent > Decimal::ZERO && self.discount_days > 0
    }
}

impl Default for PaymentTerms {
    fn default() -> Self {
        Self::net(30)
    }
}

impl fmt::Display for PaymentTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_discount() {
            write!(
                f,
                "{}/{} net {}",
                self.discount_percent.normalize(),
                self.discount_days,
                self.net_days
            )
        } else {
            write!(f, "net {}", self.net_days)
        }
    }
}

impl FromStr for PaymentTerms {
    type Err = Error;

    /// Accepts `net 30`, `2/10 net 30` and `2/10 n30`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPaymentTerms(s.to_string());
        let lowered = s.trim().to_ascii_lowercase();

        let (discount, net) = match lowered.split_once('n') {
            Some((discount, net)) => (discount.trim(), net),
            None => return Err(invalid()),
        };
        let net_days: u32 = net
            .trim_start_matches("et")
            .trim()
            .parse()
            .map_err(|_| invalid())?;

        if discount.is_empty() {
            return Ok(Self::net(net_days));
        }

        let (percent, days) = discount.split_once('/').ok_or_else(invalid)?;
        let discount_percent: Decimal = percent.trim().parse().map_err(|_| invalid())?;
        let discount_days: u32 = days.trim().parse().map_err(|_| invalid())?;
        if discount_days > net_days || discount_percent.is_sign_negative() {
            return Err(invalid());
        }

        Ok(Self {
            discount_percent,
            discount_days,
            net_days,
        })
    }
}

/// What the reconciliation decided to pay, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSchedule {
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub adjustments: Decimal,
    /// Early-payment discount captured by paying on `payment_date`.
    pub discount: Option<Decimal>,
    pub payment_id: String,
}

/// The document an instance is created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainPayload {
    Requisition(Requisition),
    Invoice(Invoice),
}

impl DomainPayload {
    pub fn requisition(&self) -> Option<&Requisition> {
        match self {
            DomainPayload::Requisition(req) => Some(req),
            DomainPayload::Invoice(_) => None,
        }
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            DomainPayload::Invoice(inv) => Some(inv),
            DomainPayload::Requisition(_) => None,
        }
    }

    /// Ingress validation. Every problem is reported, not just the first.
    pub fn validate(&self, workflow_type: WorkflowType) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        match (workflow_type, self) {
            (WorkflowType::Compliance | WorkflowType::Approval, DomainPayload::Requisition(req)) => {
                require(&mut problems, "requisition_id", &req.requisition_id);
                require(&mut problems, "requester_id", &req.requester_id);
                require(&mut problems, "department", &req.department);
                require(&mut problems, "budget_code", &req.budget_code);
                require(&mut problems, "vendor_id", &req.vendor_id);
                require(&mut problems, "category", &req.category);
                if req.total <= Decimal::ZERO {
                    problems.push(format!("total must be positive, got {}", req.total));
                }
                if let Some(grant) = req.funding.grant() {
                    require(&mut problems, "grant_id", &grant.grant_id);
                    require(
                        &mut problems,
                        "principal_investigator",
                        &grant.principal_investigator,
                    );
                }
                check_lines(&mut problems, &req.line_items, req.total);
            }
            (WorkflowType::Reconciliation, DomainPayload::Invoice(inv)) => {
                require(&mut problems, "invoice_id", &inv.invoice_id);
                require(&mut problems, "invoice_number", &inv.invoice_number);
                require(&mut problems, "vendor_id", &inv.vendor_id);
                if inv.total <= Decimal::ZERO {
                    problems.push(format!("total must be positive, got {}", inv.total));
                }
                check_lines(&mut problems, &inv.line_items, inv.total);
            }
            (workflow_type, _) => problems.push(format!(
                "{} workflow cannot run on a {} payload",
                workflow_type,
                self.kind()
            )),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DomainPayload::Requisition(_) => "requisition",
            DomainPayload::Invoice(_) => "invoice",
        }
    }
}

fn require(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{} is required", field));
    }
}

fn check_lines(problems: &mut Vec<String>, lines: &[LineItem], total: Decimal) {
    if lines.is_empty() {
        return;
    }
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            problems.push(format!("line {} has non-positive quantity", line.line_id));
        }
        if line.unit_price.is_sign_negative() {
            problems.push(format!("line {} has negative unit price", line.line_id));
        }
    }
    let sum: Decimal = lines.iter().map(LineItem::extended).sum();
    if (sum - total).abs() > Decimal::new(1, 2) {
        problems.push(format!("line items sum to {} but total is {}", sum, total));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn requisition(total: Decimal) -> Requisition {
        Requisition {
            requisition_id: "REQ-1".into(),
            requester_id: "alice".into(),
            department: "chemistry".into(),
            budget_code: "CHEM-OPS".into(),
            vendor_id: "V-100".into(),
            category: "lab_supplies".into(),
            total,
            funding: FundingSource::Institutional,
            urgency: Urgency::Standard,
            line_items: vec![],
            quote_count: 0,
            sole_source_justification: None,
        }
    }

    #[test]
    fn test_parse_payment_terms() {
        let terms: PaymentTerms = "2/10 net 30".parse().unwrap();
        assert_eq!(terms.discount_percent, dec("2"));
        assert_eq!(terms.discount_days, 10);
        assert_eq!(terms.net_days, 30);
        assert_eq!(terms.to_string(), "2/10 net 30");

        let terms: PaymentTerms = "Net 45".parse().unwrap();
        assert!(!terms.has_discount());
        assert_eq!(terms.net_days, 45);

        let terms: PaymentTerms = "1.5/15 n60".parse().unwrap();
        assert_eq!(terms.discount_percent, dec("1.5"));

        assert!("2/40 net 30".parse::<PaymentTerms>().is_err());
        assert!("cash on delivery".parse::<PaymentTerms>().is_err());
    }

    #[test]
    fn test_validate_requisition() {
        let payload = DomainPayload::Requisition(requisition(dec("1200")));
        assert!(payload.validate(WorkflowType::Approval).is_ok());

        let mut bad = requisition(dec("0"));
        bad.requester_id.clear();
        let problems = DomainPayload::Requisition(bad)
            .validate(WorkflowType::Approval)
            .unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_validate_rejects_mismatched_payload_kind() {
        let payload = DomainPayload::Requisition(requisition(dec("10")));
        let problems = payload.validate(WorkflowType::Reconciliation).unwrap_err();
        assert!(problems[0].contains("requisition payload"));
    }

    #[test]
    fn test_validate_line_totals() {
        let mut req = requisition(dec("100"));
        req.line_items = vec![LineItem::new("1", "beakers", dec("4"), dec("20"))];
        let problems = DomainPayload::Requisition(req)
            .validate(WorkflowType::Compliance)
            .unwrap_err();
        assert!(problems[0].contains("sum to 80"));
    }
}
