//! Requisition lifecycle demo
//!
//! This example demonstrates:
//! - Compliance checking of a requisition before it is routed
//! - Approval-chain routing with per-stage approvers
//! - Three-way matching of the resulting invoice and payment scheduling
//! - Querying instance state and reading the audit trail
//!
//! ## Scenario
//! - A $30,000 lab-supplies requisition from the physics department
//! - Compliance passes all five checks
//! - The chain needs the supervisor (sam) and the department head (dana)
//! - Both approve, and the purchase order is issued
//! - The vendor invoices against the order on "2/10 net 30" terms
//! - The invoice matches order and receipt; payment takes the discount
//!
//! ## Key Takeaways
//! - Every transition lands in the audit trail before it takes effect
//! - Signals are routed to the running instance by id
//! - Queries never block the instance
//!
//! ## Prerequisites
//! None - uses in-memory storage
//!
//! ## Run with
//! ```bash
//! cargo run --example requisition_lifecycle
//! ```

use chrono::Utc;
use procflow::prelude::*;
use std::time::Duration;

async fn wait_for_approver(engine: &Engine, id: Uuid, approver: &str) -> Result<(), EngineError> {
    loop {
        let view = engine.query(id).await?;
        if view.pending_approver().as_deref() == Some(approver) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let line = LineItem::new(
        "1",
        "Cryostat service kit",
        Decimal::from(4),
        Decimal::from(7_500),
    );
    let order = PurchaseOrder {
        po_number: "PO-2026-0415".into(),
        vendor_id: "V-100".into(),
        total: line.extended(),
        line_items: vec![line.clone()],
    };
    let receipt = Receipt {
        receipt_id: "RCV-0415".into(),
        po_number: order.po_number.clone(),
        lines: vec![ReceivedLine {
            line_id: "1".into(),
            quantity: Decimal::from(4),
        }],
    };

    let activities = Arc::new(
        DirectoryActivities::new()
            .with_department("physics", Department::new("sam", "dana", "erin"))
            .with_budget("PHY-100", Decimal::from(250_000))
            .with_vendor(VendorRecord::in_good_standing("V-100"))
            .with_purchase_order(order.clone())
            .with_receipt(receipt),
    );
    let log = Arc::new(InMemoryAuditLog::new());
    let engine = Engine::new(log, activities.clone());

    let requisition = Requisition {
        requisition_id: "REQ-2026-0415".into(),
        requester_id: "alice".into(),
        department: "physics".into(),
        budget_code: "PHY-100".into(),
        vendor_id: "V-100".into(),
        category: "lab_supplies".into(),
        total: line.extended(),
        funding: FundingSource::Institutional,
        urgency: Urgency::Standard,
        line_items: vec![line.clone()],
        quote_count: 3,
        sole_source_justification: None,
    };

    println!("\n=== Compliance ===");
    let compliance = engine
        .create_instance(
            WorkflowType::Compliance,
            DomainPayload::Requisition(requisition.clone()),
        )
        .await?;
    let view = engine.wait_for_terminal(compliance).await?;
    println!("compliance {} -> {}", compliance, view.status());
    for check in &view.state().checks {
        println!("  {:?}: {:?}", check.check, check.outcome);
    }

    println!("\n=== Approval ===");
    let approval = engine
        .create_instance(WorkflowType::Approval, DomainPayload::Requisition(requisition))
        .await?;

    wait_for_approver(&engine, approval, "sam").await?;
    println!("awaiting sam");
    engine.signal(approval, Signal::approve("sam")).await?;

    wait_for_approver(&engine, approval, "dana").await?;
    println!("awaiting dana");
    engine
        .signal(
            approval,
            Signal::approve("dana").with_note("Within the instrument budget"),
        )
        .await?;

    let view = engine.wait_for_terminal(approval).await?;
    println!(
        "approval {} -> {} (po {})",
        approval,
        view.status(),
        view.purchase_order().unwrap_or("-")
    );
    for stage in view.stages() {
        println!(
            "  {} by {}: {:?}",
            stage.stage.id, stage.stage.approver, stage.status
        );
    }

    println!("\n=== Reconciliation ===");
    let invoice = Invoice {
        invoice_id: "INV-0415".into(),
        invoice_number: "CS-88213".into(),
        vendor_id: "V-100".into(),
        po_number: Some(order.po_number.clone()),
        invoice_date: Utc::now().date_naive(),
        total: line.extended(),
        line_items: vec![line],
        terms: Some("2/10 net 30".parse()?),
    };
    let reconciliation = engine
        .create_instance(WorkflowType::Reconciliation, DomainPayload::Invoice(invoice))
        .await?;
    let view = engine.wait_for_terminal(reconciliation).await?;
    println!("reconciliation {} -> {}", reconciliation, view.status());
    if let Some(payment) = view.payment() {
        println!(
            "  pay {} on {} (discount {:?})",
            payment.amount, payment.payment_date, payment.discount
        );
    }

    println!("\n=== Audit trail of {} ===", approval);
    for entry in engine.audit_trail(approval).await? {
        println!("  #{:<3} {}", entry.seq(), entry.action());
    }

    println!("\n=== Notifications ===");
    for notification in activities.notifications() {
        println!(
            "  {} -> {}: {}",
            notification.kind, notification.recipient, notification.subject
        );
    }

    engine.shutdown().await;
    Ok(())
}
