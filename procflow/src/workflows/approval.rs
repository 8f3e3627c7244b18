//! Approval-chain routing for a requisition.
//!
//! Validates the budget, asks the directory for the approval chain, then
//! walks the chain one stage at a time. A reject or return at any stage ends
//! the instance; a fully approved chain issues the purchase order.

use super::Outcome;
use crate::activity::{ActivityCall, BudgetCheck};
use crate::audit::AuditEvent;
use crate::model::{InstanceStatus, Requisition, Stage, WorkflowType};
use crate::runtime::escalation::{await_stage_decision, StageResolution};
use crate::runtime::{ExecutionError, WorkflowContext};
use tracing::info;

type Result<T> = std::result::Result<T, ExecutionError>;

pub(super) async fn run(ctx: &mut WorkflowContext) -> Result<Outcome> {
    let req = ctx
        .state()
        .payload
        .requisition()
        .cloned()
        .ok_or(ExecutionError::PayloadMismatch(WorkflowType::Approval))?;

    ctx.set_status(InstanceStatus::Checking).await?;

    let budget: BudgetCheck = ctx
        .call(ActivityCall::ValidateBudget {
            budget_code: req.budget_code.clone(),
            amount: req.total,
        })
        .await?;
    if !budget.available {
        return close_unapproved(ctx, &req, InstanceStatus::Rejected, "Insufficient budget".into())
            .await;
    }

    let stages: Vec<Stage> = ctx
        .call(ActivityCall::DetermineApprovalChain {
            amount: req.total,
            category: req.category.clone(),
            funding: req.funding.clone(),
            department: req.department.clone(),
        })
        .await?;
    info!(
        "Approval chain planned: instance={}, stages={:?}",
        ctx.id(),
        stages.iter().map(|s| s.role.as_str()).collect::<Vec<_>>()
    );
    ctx.record(AuditEvent::StagesPlanned {
        stages: stages.clone(),
    })
    .await?;

    if stages.is_empty() {
        return approve(ctx, &req, "Auto-approved: no approval required").await;
    }

    ctx.set_status(InstanceStatus::AwaitingApproval).await?;
    let factor = ctx.config().approval.urgency_factor(req.urgency);

    for (index, stage) in stages.iter().enumerate() {
        if !stage.applies_to(req.total) {
            let reason = match stage.min_amount {
                Some(min) => format!("{} is below the {} minimum of {}", req.total, stage.role, min),
                None => format!("{} does not apply", stage.role),
            };
            ctx.record(AuditEvent::StageSkipped { index, reason }).await?;
            continue;
        }

        ctx.record(AuditEvent::StageActivated { index }).await?;
        ctx.perform(ActivityCall::NotifyApprover {
            instance_id: ctx.id(),
            recipient: stage.approver.clone(),
            subject: format!(
                "Approval required: requisition {} ({}, {})",
                req.requisition_id, stage.name, req.total
            ),
            reminder: false,
        })
        .await?;

        let cadence = stage.escalation.scaled_interval(factor);
        match await_stage_decision(ctx, index, cadence).await? {
            StageResolution::Approved => {}
            StageResolution::Rejected { actor, reason } => {
                info!(
                    "Requisition rejected: instance={}, stage={}, actor={}",
                    ctx.id(),
                    stage.id,
                    actor
                );
                return close_unapproved(ctx, &req, InstanceStatus::Rejected, reason).await;
            }
            StageResolution::Returned {
                actor,
                reason,
                return_to,
            } => {
                let reason = format!("Returned to {} by {}: {}", return_to, actor, reason);
                return close_unapproved(ctx, &req, InstanceStatus::Returned, reason).await;
            }
        }
    }

    approve(ctx, &req, "All approval stages completed").await
}

async fn approve(ctx: &mut WorkflowContext, req: &Requisition, note: &str) -> Result<Outcome> {
    let po_number: String = ctx
        .call(ActivityCall::GeneratePurchaseOrder {
            requisition_id: req.requisition_id.clone(),
            vendor_id: req.vendor_id.clone(),
            amount: req.total,
            line_items: req.line_items.clone(),
        })
        .await?;
    ctx.record(AuditEvent::PurchaseOrderIssued {
        po_number: po_number.clone(),
    })
    .await?;

    ctx.perform(ActivityCall::UpdateRequisitionStatus {
        requisition_id: req.requisition_id.clone(),
        status: InstanceStatus::Approved.as_str().to_string(),
    })
    .await?;
    ctx.perform(ActivityCall::NotifyRequester {
        instance_id: ctx.id(),
        recipient: req.requester_id.clone(),
        subject: format!(
            "Requisition {} approved; purchase order {} issued",
            req.requisition_id, po_number
        ),
    })
    .await?;

    Ok(Outcome::because(InstanceStatus::Approved, note))
}

async fn close_unapproved(
    ctx: &mut WorkflowContext,
    req: &Requisition,
    status: InstanceStatus,
    reason: String,
) -> Result<Outcome> {
    ctx.perform(ActivityCall::UpdateRequisitionStatus {
        requisition_id: req.requisition_id.clone(),
        status: status.as_str().to_string(),
    })
    .await?;
    ctx.perform(ActivityCall::NotifyRequester {
        instance_id: ctx.id(),
        recipient: req.requester_id.clone(),
        subject: format!("Requisition {} {}: {}", req.requisition_id, status, reason),
    })
    .await?;
    Ok(Outcome::because(status, reason))
}
