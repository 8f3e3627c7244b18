//! Three-way match, discrepancy resolution, disputes and payment scheduling.

mod common;

use chrono::Days;
use common::*;
use procflow::model::{DiscrepancyKind, ExceptionKind, ExceptionStatus, Severity};
use procflow::prelude::*;

async fn start(h: &Harness, invoice: Invoice) -> Uuid {
    h.engine
        .create_instance(WorkflowType::Reconciliation, DomainPayload::Invoice(invoice))
        .await
        .unwrap()
}

async fn waiting_on(h: &Harness, id: Uuid, status: InstanceStatus) -> InstanceView {
    eventually(&h.engine, id, |view| view.status() == status).await
}

fn matched_directory() -> DirectoryActivities {
    directory()
        .with_purchase_order(purchase_order("PO-7", "100", "5.00"))
        .with_receipt(receipt("PO-7", "100"))
}

#[tokio::test(start_paused = true)]
async fn test_invoice_without_po_blocks_until_approved() {
    let h = harness(directory());
    let id = start(&h, invoice(None, "100", "12.00")).await;

    let view = waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    assert_eq!(view.discrepancies().len(), 1);
    let discrepancy = &view.discrepancies()[0];
    assert_eq!(discrepancy.kind, DiscrepancyKind::NoPo);
    assert_eq!(discrepancy.severity, Severity::High);
    assert_eq!(view.pending_approver().as_deref(), Some("ap-reviewer"));
    assert!(h.directory.payments().is_empty());

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "ap-reviewer")
                .with_note("Blanket order on file"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Matched);
    let payment = view.payment().unwrap();
    assert_eq!(payment.amount, dec("1200.00"));
    assert_eq!(payment.adjustments, Decimal::ZERO);
    assert_eq!(payment.discount, None);
    assert_eq!(payment.payment_date, base_date() + Days::new(30));

    let payments = h.directory.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].0, payment.payment_id);
    assert_eq!(payments[0].2, dec("1200.00"));
}

#[tokio::test(start_paused = true)]
async fn test_clean_match_takes_early_payment_discount() {
    let h = harness(matched_directory());
    let mut inv = invoice(Some("PO-7"), "100", "5.00");
    inv.terms = Some("2/10 net 30".parse().unwrap());
    let id = start(&h, inv).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Matched);
    assert!(view.discrepancies().is_empty());
    assert!(view.exceptions().is_empty());

    let payment = view.payment().unwrap();
    assert_eq!(payment.discount, Some(dec("10.00")));
    assert_eq!(payment.amount, dec("500.00"));
    assert_eq!(payment.payment_date, base_date() + Days::new(10));
}

#[tokio::test(start_paused = true)]
async fn test_discount_never_reduces_scheduled_amount() {
    let h = harness(directory());
    let mut inv = invoice(None, "100", "12.00");
    inv.terms = Some("2/10 net 30".parse().unwrap());
    let id = start(&h, inv).await;

    waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "ap-reviewer"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    let payment = view.payment().unwrap();
    assert_eq!(payment.amount, dec("1200.00"));
    assert_eq!(payment.discount, Some(dec("24.00")));
    assert_eq!(payment.payment_date, base_date() + Days::new(10));
    assert_eq!(h.directory.payments()[0].2, dec("1200.00"));
}

#[tokio::test(start_paused = true)]
async fn test_small_variances_do_not_block_payment() {
    let h = harness(matched_directory());
    let id = start(&h, invoice(Some("PO-7"), "100", "5.05")).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Matched);
    assert_eq!(view.discrepancies().len(), 1);
    assert_eq!(view.discrepancies()[0].kind, DiscrepancyKind::PriceVariance);
    assert_eq!(view.discrepancies()[0].severity, Severity::Low);
    assert!(view.exceptions().is_empty());
    assert_eq!(view.payment().unwrap().amount, dec("505.00"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_receipt_is_high_severity() {
    let h = harness(directory().with_purchase_order(purchase_order("PO-7", "100", "5.00")));
    let id = start(&h, invoice(Some("PO-7"), "100", "5.00")).await;

    let view = waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    assert_eq!(view.discrepancies()[0].kind, DiscrepancyKind::MissingReceipt);

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Reject, "ap-reviewer")
                .with_note("Goods never arrived"),
        )
        .await
        .unwrap();
    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Rejected);
    assert!(view.reason().unwrap().contains("Goods never arrived"));
    assert!(h.directory.payments().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dispute_settled_with_adjustment() {
    let h = harness(matched_directory());
    let id = start(&h, invoice(Some("PO-7"), "100", "6.00")).await;

    let view = waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    let discrepancy = &view.discrepancies()[0];
    assert_eq!(discrepancy.kind, DiscrepancyKind::PriceVariance);
    assert_eq!(discrepancy.severity, Severity::High);
    assert_eq!(
        view.exceptions()[0].discrepancy_id.as_deref(),
        Some(discrepancy.id.as_str())
    );

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Dispute, "ap-reviewer"),
        )
        .await
        .unwrap();

    let view = waiting_on(&h, id, InstanceStatus::AwaitingDispute).await;
    assert_eq!(view.exceptions().len(), 2);
    assert_eq!(view.exceptions()[0].status, ExceptionStatus::Disputed);
    let dispute_id = view.exceptions()[0].dispute_id.clone().unwrap();
    assert!(dispute_id.starts_with("DSP-"));
    let followup = &view.exceptions()[1];
    assert_eq!(followup.kind, ExceptionKind::VendorDispute);
    assert_eq!(followup.dispute_id.as_deref(), Some(dispute_id.as_str()));

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-2", ResolutionAction::Approve, "ap-reviewer")
                .with_adjustment(dec("100.00"))
                .with_note("Vendor credited the overcharge"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Matched);
    let payment = view.payment().unwrap();
    assert_eq!(payment.adjustments, dec("100.00"));
    assert_eq!(payment.amount, dec("500.00"));
}

#[tokio::test(start_paused = true)]
async fn test_dispute_cannot_be_raised_on_a_dispute() {
    let h = harness(matched_directory());
    let id = start(&h, invoice(Some("PO-7"), "100", "6.00")).await;
    waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Dispute, "ap-reviewer"),
        )
        .await
        .unwrap();
    waiting_on(&h, id, InstanceStatus::AwaitingDispute).await;

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-2", ResolutionAction::Dispute, "ap-reviewer"),
        )
        .await
        .unwrap();
    let view = eventually(&h.engine, id, |view| view.state().signals_rejected == 1).await;
    assert!(view.exceptions()[1].is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_dispute_times_out() {
    let h = harness(matched_directory());
    let id = start(&h, invoice(Some("PO-7"), "100", "6.00")).await;
    waiting_on(&h, id, InstanceStatus::AwaitingExceptions).await;
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Dispute, "ap-reviewer"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Disputed);
    assert_eq!(view.reason(), Some("Unresolved after 60 days: EXC-2"));
    assert!(h.directory.payments().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_discrepancy_times_out() {
    let h = harness(directory());
    let id = start(&h, invoice(None, "10", "3.00")).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Exception);
    assert_eq!(view.reason(), Some("Unresolved after 30 days: EXC-1"));
    let ended = view.state().ended_at.unwrap();
    assert!(ended >= base_time() + chrono::Duration::days(30));
}
