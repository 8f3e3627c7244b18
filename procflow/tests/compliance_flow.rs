//! Compliance checking and the exception sub-flow.

mod common;

use common::*;
use procflow::audit::AuditEvent;
use procflow::model::{CheckOutcome, ComplianceCheck, ExceptionKind, ExceptionStatus};
use procflow::prelude::*;
use std::time::Duration;

const DAY: u64 = 86_400;

async fn start(h: &Harness, req: Requisition) -> Uuid {
    h.engine
        .create_instance(WorkflowType::Compliance, DomainPayload::Requisition(req))
        .await
        .unwrap()
}

async fn awaiting_exceptions(h: &Harness, id: Uuid) -> InstanceView {
    eventually(&h.engine, id, |view| {
        view.status() == InstanceStatus::AwaitingExceptions
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_clean_requisition_is_compliant() {
    let h = harness(directory());
    let id = start(&h, requisition("3000")).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Compliant);

    let checks: Vec<ComplianceCheck> = view.state().checks.iter().map(|c| c.check).collect();
    assert_eq!(
        checks,
        vec![
            ComplianceCheck::GrantRestriction,
            ComplianceCheck::SpendingThreshold,
            ComplianceCheck::VendorStatus,
            ComplianceCheck::CompetitiveBidding,
            ComplianceCheck::PolicyEngine,
        ]
    );
    assert!(view
        .state()
        .checks
        .iter()
        .all(|c| c.outcome == CheckOutcome::Passed));
}

#[tokio::test(start_paused = true)]
async fn test_restricted_grant_expense_rejected_by_pi() {
    let h = harness(directory());
    let id = start(&h, grant_requisition("2000", "entertainment")).await;

    let view = awaiting_exceptions(&h, id).await;
    assert_eq!(view.exceptions().len(), 1);
    let exception = &view.exceptions()[0];
    assert_eq!(exception.kind, ExceptionKind::GrantRestriction);
    assert_eq!(exception.approver, "pat");
    assert_eq!(view.pending_approver().as_deref(), Some("pat"));

    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Reject, "pat")
                .with_note("Not an allowable cost"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Violation);
    assert!(view.reason().unwrap().contains("rejected"));
    assert_eq!(view.exceptions()[0].status, ExceptionStatus::Rejected);
}

#[tokio::test(start_paused = true)]
async fn test_all_exceptions_approved() {
    let h = harness(directory());
    let id = start(&h, grant_requisition("60000", "entertainment")).await;

    let view = awaiting_exceptions(&h, id).await;
    let approvers: Vec<&str> = view.exceptions().iter().map(|e| e.approver.as_str()).collect();
    assert_eq!(approvers, vec!["pat", "budget-officer"]);

    // Only the named approver may resolve an exception.
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-2", ResolutionAction::Approve, "pat"),
        )
        .await
        .unwrap();
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "pat"),
        )
        .await
        .unwrap();
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Reject, "pat"),
        )
        .await
        .unwrap();
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-2", ResolutionAction::Approve, "budget-officer"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::ExceptionApproved);
    assert_eq!(view.state().signals_rejected, 2);
    assert!(view
        .exceptions()
        .iter()
        .all(|e| e.status == ExceptionStatus::Approved));
}

#[tokio::test(start_paused = true)]
async fn test_debarred_vendor_is_a_hard_violation() {
    let h = harness(directory().with_vendor(VendorRecord {
        debarred: true,
        ..VendorRecord::in_good_standing("V-100")
    }));
    let id = start(&h, grant_requisition("2000", "entertainment")).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Violation);
    assert!(view.reason().unwrap().starts_with("Vendor V-100 is debarred"));

    // The grant exception was found but never raised.
    assert!(view.exceptions().is_empty());
    assert_eq!(view.state().checks.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_federal_grant_requires_registration() {
    let h = harness(directory().with_vendor(VendorRecord {
        registered: false,
        ..VendorRecord::in_good_standing("V-100")
    }));
    let mut req = grant_requisition("2000", "lab_supplies");
    if let FundingSource::Grant(grant) = &mut req.funding {
        grant.federal = true;
    }
    let id = start(&h, req).await;

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::Violation);
    assert!(view.reason().unwrap().contains("federal registration"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_quotes_route_to_procurement() {
    let h = harness(directory());
    let mut req = requisition("30000");
    req.quote_count = 1;
    let id = start(&h, req).await;

    let view = awaiting_exceptions(&h, id).await;
    assert_eq!(view.exceptions().len(), 1);
    assert_eq!(view.exceptions()[0].kind, ExceptionKind::CompetitiveBidding);
    assert_eq!(view.exceptions()[0].approver, "procurement-officer");
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_exceptions_go_to_administrator_then_time_out() {
    let h = harness(directory());
    let id = start(&h, grant_requisition("2000", "entertainment")).await;
    awaiting_exceptions(&h, id).await;

    tokio::time::sleep(Duration::from_secs(14 * DAY + 60)).await;
    let view = h.engine.query(id).await.unwrap();
    assert!(!view.is_terminal());
    assert_eq!(
        view.state().exception_administrator.as_deref(),
        Some("compliance-admin")
    );
    assert!(view.pending_approvers().contains(&"compliance-admin".to_string()));
    assert_eq!(h.directory.notifications_for("compliance-admin").len(), 1);

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::ExceptionPending);
    assert_eq!(
        view.reason(),
        Some("Exceptions unresolved after timeout: EXC-1")
    );

    let trail = h.engine.audit_trail(id).await.unwrap();
    assert!(trail
        .iter()
        .any(|e| matches!(e.event(), AuditEvent::ExceptionsTimedOut { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_administrator_resolves_after_timeout() {
    let h = harness(directory());
    let id = start(&h, grant_requisition("2000", "entertainment")).await;
    awaiting_exceptions(&h, id).await;

    tokio::time::sleep(Duration::from_secs(14 * DAY + 60)).await;
    h.engine
        .signal(
            id,
            Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "compliance-admin"),
        )
        .await
        .unwrap();

    let view = h.engine.wait_for_terminal(id).await.unwrap();
    assert_eq!(view.status(), InstanceStatus::ExceptionApproved);
    let resolution = view.exceptions()[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.actor, "compliance-admin");
}

#[tokio::test(start_paused = true)]
async fn test_stage_signals_are_refused_during_exception_wait() {
    let h = harness(directory());
    let id = start(&h, grant_requisition("2000", "entertainment")).await;
    awaiting_exceptions(&h, id).await;

    h.engine.signal(id, Signal::approve("pat")).await.unwrap();
    let view = eventually(&h.engine, id, |view| view.state().signals_rejected == 1).await;
    assert_eq!(view.status(), InstanceStatus::AwaitingExceptions);
    assert!(view.exceptions()[0].is_pending());
}
