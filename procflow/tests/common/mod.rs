//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use procflow::prelude::*;
use std::time::Duration;

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn base_date() -> NaiveDate {
    base_time().date_naive()
}

/// Physics department (sam / dana / erin), a funded budget and one vendor in
/// good standing.
pub fn directory() -> DirectoryActivities {
    DirectoryActivities::new()
        .with_department("physics", Department::new("sam", "dana", "erin"))
        .with_budget("PHY-100", dec("1000000"))
        .with_vendor(VendorRecord::in_good_standing("V-100"))
}

pub fn requisition(total: &str) -> Requisition {
    Requisition {
        requisition_id: "REQ-2026-001".into(),
        requester_id: "alice".into(),
        department: "physics".into(),
        budget_code: "PHY-100".into(),
        vendor_id: "V-100".into(),
        category: "lab_supplies".into(),
        total: dec(total),
        funding: FundingSource::Institutional,
        urgency: Urgency::Standard,
        line_items: vec![],
        quote_count: 3,
        sole_source_justification: None,
    }
}

pub fn grant_requisition(total: &str, category: &str) -> Requisition {
    Requisition {
        category: category.into(),
        funding: FundingSource::Grant(GrantFunding {
            grant_id: "NSF-4471".into(),
            principal_investigator: "pat".into(),
            federal: false,
        }),
        ..requisition(total)
    }
}

pub fn purchase_order(po_number: &str, quantity: &str, unit_price: &str) -> PurchaseOrder {
    let line = LineItem::new("1", "nitrile gloves", dec(quantity), dec(unit_price));
    PurchaseOrder {
        po_number: po_number.into(),
        vendor_id: "V-100".into(),
        total: line.extended(),
        line_items: vec![line],
    }
}

pub fn receipt(po_number: &str, quantity: &str) -> Receipt {
    Receipt {
        receipt_id: format!("RCV-{}", po_number),
        po_number: po_number.into(),
        lines: vec![ReceivedLine {
            line_id: "1".into(),
            quantity: dec(quantity),
        }],
    }
}

pub fn invoice(po_number: Option<&str>, quantity: &str, unit_price: &str) -> Invoice {
    let line = LineItem::new("1", "nitrile gloves", dec(quantity), dec(unit_price));
    Invoice {
        invoice_id: "INV-88".into(),
        invoice_number: "A-2026-0088".into(),
        vendor_id: "V-100".into(),
        po_number: po_number.map(str::to_string),
        invoice_date: base_date(),
        total: line.extended(),
        line_items: vec![line],
        terms: None,
    }
}

pub struct Harness {
    pub engine: Engine,
    pub directory: Arc<DirectoryActivities>,
    pub log: Arc<InMemoryAuditLog>,
    pub clock: Arc<TokioClock>,
}

/// Engine over an in-memory log and a clock that follows tokio's virtual time.
pub fn harness(directory: DirectoryActivities) -> Harness {
    let directory = Arc::new(directory);
    let log = Arc::new(InMemoryAuditLog::new());
    let clock = Arc::new(TokioClock::starting_at(base_time()));
    let engine = Engine::new(log.clone(), directory.clone()).with_clock(clock.clone());
    Harness {
        engine,
        directory,
        log,
        clock,
    }
}

impl Harness {
    /// A second engine over the same log and activities, as after a restart.
    pub fn restart(&self) -> Engine {
        Engine::new(self.log.clone(), self.directory.clone()).with_clock(self.clock.clone())
    }
}

/// Polls the instance until `check` holds.
pub async fn eventually<F>(engine: &Engine, id: Uuid, check: F) -> InstanceView
where
    F: Fn(&InstanceView) -> bool,
{
    for _ in 0..500 {
        let view = engine.query(id).await.unwrap();
        if check(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {} never reached the expected state", id);
}

/// Polls until `condition` holds.
pub async fn until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

pub async fn awaiting(engine: &Engine, id: Uuid, approver: &str) -> InstanceView {
    eventually(engine, id, |view| {
        view.pending_approver().as_deref() == Some(approver)
    })
    .await
}

pub fn actions(trail: &[AuditEntry]) -> Vec<&'static str> {
    trail.iter().map(AuditEntry::action).collect()
}

/// Polls the log until the instance's trail has been handed to the archive.
pub async fn archived(log: &InMemoryAuditLog, id: Uuid) {
    for _ in 0..500 {
        let record = log.instance(id).await.unwrap();
        if record.map_or(false, |record| record.archived) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {} was never archived", id);
}
