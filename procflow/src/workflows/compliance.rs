//! Policy compliance checking for a requisition.
//!
//! Runs five independent checks in order. Hard violations end the instance
//! at once; everything else that fails becomes an exception routed to the
//! responsible officer, and the instance waits for all of them.

use super::{next_exception, rejection_reasons, Outcome};
use crate::activity::{
    ActivityCall, BudgetCheck, DebarmentStatus, PolicyFinding, RegistrationStatus,
    VendorCompliance,
};
use crate::audit::AuditEvent;
use crate::config::ComplianceConfig;
use crate::model::{
    CheckOutcome, CheckRecord, ComplianceCheck, ExceptionKind, ExceptionRequest, FundingSource,
    InstanceStatus, Requisition, TimerPurpose, WorkflowType,
};
use crate::runtime::escalation::{
    await_exceptions, ExceptionOutcome, ExceptionWait, TimeoutFallback,
};
use crate::runtime::{ExecutionError, WorkflowContext};
use tracing::info;

type Result<T> = std::result::Result<T, ExecutionError>;

pub(super) async fn run(ctx: &mut WorkflowContext) -> Result<Outcome> {
    let requisition = ctx
        .state()
        .payload
        .requisition()
        .cloned()
        .ok_or(ExecutionError::PayloadMismatch(WorkflowType::Compliance))?;
    let config = ctx.config();
    let config = &config.compliance;

    ctx.set_status(InstanceStatus::Checking).await?;

    let mut requests = Vec::new();
    for check in [
        ComplianceCheck::GrantRestriction,
        ComplianceCheck::SpendingThreshold,
        ComplianceCheck::VendorStatus,
        ComplianceCheck::CompetitiveBidding,
        ComplianceCheck::PolicyEngine,
    ] {
        let record = run_check(ctx, check, &requisition, config).await?;
        ctx.record(AuditEvent::CheckCompleted {
            record: record.clone(),
        })
        .await?;

        match record.outcome {
            CheckOutcome::Passed => {}
            CheckOutcome::ExceptionRequired { requests: required } => requests.extend(required),
            CheckOutcome::HardViolation { reason } => {
                info!(
                    "Hard violation: instance={}, check={:?}, reason={}",
                    ctx.id(),
                    check,
                    reason
                );
                return Ok(Outcome::because(InstanceStatus::Violation, reason));
            }
        }
    }

    if requests.is_empty() {
        return Ok(Outcome::new(InstanceStatus::Compliant));
    }

    for request in requests {
        let exception = next_exception(ctx, request.kind, request.description, request.approver);
        let subject = format!(
            "Compliance exception {} on requisition {}: {}",
            exception.id, requisition.requisition_id, exception.description
        );
        let recipient = exception.approver.clone();
        ctx.record(AuditEvent::ExceptionRaised { exception }).await?;
        ctx.perform(ActivityCall::NotifyApprover {
            instance_id: ctx.id(),
            recipient,
            subject,
            reminder: false,
        })
        .await?;
    }
    ctx.set_status(InstanceStatus::AwaitingExceptions).await?;

    let wait = ExceptionWait {
        purpose: TimerPurpose::ExceptionTimeout,
        timeout: config.exception_timeout,
        fallback: TimeoutFallback::NotifyAdministrator {
            administrator: config.administrator.clone(),
            grace: config.admin_grace_period,
        },
        allow_dispute: false,
    };
    let waited = await_exceptions(ctx, &wait).await?;

    if let Some(reasons) = rejection_reasons(ctx) {
        return Ok(Outcome::because(InstanceStatus::Violation, reasons));
    }
    Ok(match waited {
        ExceptionOutcome::Resolved => Outcome::new(InstanceStatus::ExceptionApproved),
        ExceptionOutcome::TimedOut { pending } => Outcome::because(
            InstanceStatus::ExceptionPending,
            format!("Exceptions unresolved after timeout: {}", pending.join(", ")),
        ),
    })
}

async fn run_check(
    ctx: &mut WorkflowContext,
    check: ComplianceCheck,
    req: &Requisition,
    config: &ComplianceConfig,
) -> Result<CheckRecord> {
    match check {
        ComplianceCheck::GrantRestriction => Ok(grant_restriction(req, config)),
        ComplianceCheck::SpendingThreshold => spending_threshold(ctx, req, config).await,
        ComplianceCheck::VendorStatus => vendor_status(ctx, req, config).await,
        ComplianceCheck::CompetitiveBidding => Ok(competitive_bidding(req, config)),
        ComplianceCheck::PolicyEngine => {
            let findings: Vec<PolicyFinding> = ctx
                .call(ActivityCall::EvaluatePolicies {
                    requisition: req.clone(),
                })
                .await?;
            let requests = findings
                .into_iter()
                .map(|finding| ExceptionRequest {
                    kind: ExceptionKind::PolicyRule,
                    description: format!("{}: {}", finding.rule, finding.description),
                    approver: config.compliance_officer.clone(),
                })
                .collect();
            Ok(CheckRecord::requires(check, requests))
        }
    }
}

fn grant_restriction(req: &Requisition, config: &ComplianceConfig) -> CheckRecord {
    let check = ComplianceCheck::GrantRestriction;
    let FundingSource::Grant(grant) = &req.funding else {
        return CheckRecord::passed(check);
    };

    let mut categories: Vec<&str> = std::iter::once(req.category.as_str())
        .chain(req.line_items.iter().filter_map(|line| line.category.as_deref()))
        .filter(|category| config.is_restricted(category))
        .collect();
    categories.sort_unstable();
    categories.dedup();

    let requests = categories
        .into_iter()
        .map(|category| ExceptionRequest {
            kind: ExceptionKind::GrantRestriction,
            description: format!(
                "Grant {} funds may not be spent on {} without PI approval",
                grant.grant_id, category
            ),
            approver: grant.principal_investigator.clone(),
        })
        .collect();
    CheckRecord::requires(check, requests)
}

async fn spending_threshold(
    ctx: &mut WorkflowContext,
    req: &Requisition,
    config: &ComplianceConfig,
) -> Result<CheckRecord> {
    let mut requests = Vec::new();

    if req.total > config.spending_limit {
        requests.push(ExceptionRequest {
            kind: ExceptionKind::SpendingThreshold,
            description: format!(
                "Total {} exceeds the single-purchase limit of {}",
                req.total, config.spending_limit
            ),
            approver: config.budget_officer.clone(),
        });
    }

    let budget: BudgetCheck = ctx
        .call(ActivityCall::ValidateBudget {
            budget_code: req.budget_code.clone(),
            amount: req.total,
        })
        .await?;
    if !budget.available {
        requests.push(ExceptionRequest {
            kind: ExceptionKind::SpendingThreshold,
            description: format!(
                "Budget {} has {} remaining; {} requested",
                req.budget_code, budget.remaining, req.total
            ),
            approver: config.budget_officer.clone(),
        });
    }

    Ok(CheckRecord::requires(ComplianceCheck::SpendingThreshold, requests))
}

async fn vendor_status(
    ctx: &mut WorkflowContext,
    req: &Requisition,
    config: &ComplianceConfig,
) -> Result<CheckRecord> {
    let check = ComplianceCheck::VendorStatus;
    let vendor_id = req.vendor_id.clone();

    let debarment: DebarmentStatus = ctx
        .call(ActivityCall::CheckDebarment {
            vendor_id: vendor_id.clone(),
        })
        .await?;
    if debarment.debarred {
        let reason = match debarment.reason {
            Some(why) => format!("Vendor {} is debarred: {}", vendor_id, why),
            None => format!("Vendor {} is debarred", vendor_id),
        };
        return Ok(CheckRecord::hard_violation(check, reason));
    }

    if let Some(grant) = req.funding.grant().filter(|grant| grant.federal) {
        let registration: RegistrationStatus = ctx
            .call(ActivityCall::CheckRegistration {
                vendor_id: vendor_id.clone(),
            })
            .await?;
        if !registration.registered {
            return Ok(CheckRecord::hard_violation(
                check,
                format!(
                    "Vendor {} has no active federal registration, required for grant {}",
                    vendor_id, grant.grant_id
                ),
            ));
        }
    }

    let compliance: VendorCompliance = ctx
        .call(ActivityCall::CheckVendorCompliance {
            vendor_id: vendor_id.clone(),
        })
        .await?;
    let mut requests = Vec::new();
    if !compliance.approved {
        requests.push(ExceptionRequest {
            kind: ExceptionKind::VendorCompliance,
            description: format!("Vendor {} is not on the approved vendor list", vendor_id),
            approver: config.procurement_officer.clone(),
        });
    }
    requests.extend(compliance.issues.into_iter().map(|issue| ExceptionRequest {
        kind: ExceptionKind::VendorCompliance,
        description: format!("Vendor {}: {}", vendor_id, issue),
        approver: config.procurement_officer.clone(),
    }));

    Ok(CheckRecord::requires(check, requests))
}

fn competitive_bidding(req: &Requisition, config: &ComplianceConfig) -> CheckRecord {
    let check = ComplianceCheck::CompetitiveBidding;
    let threshold = match req.funding.grant() {
        Some(grant) if grant.federal => config.federal_bidding_threshold,
        _ => config.institutional_bidding_threshold,
    };
    if req.total <= threshold || req.quote_count >= config.minimum_quotes {
        return CheckRecord::passed(check);
    }

    let description = match &req.sole_source_justification {
        Some(justification) => format!(
            "Sole-source justification requires review: {}",
            justification
        ),
        None => format!(
            "Purchases above {} need {} quotes; {} provided",
            threshold, config.minimum_quotes, req.quote_count
        ),
    };
    CheckRecord::requires(
        check,
        vec![ExceptionRequest {
            kind: ExceptionKind::CompetitiveBidding,
            description,
            approver: config.procurement_officer.clone(),
        }],
    )
}
