//! Three-way match of an invoice against its purchase order and receipt.
//!
//! Every mismatch becomes a severity-scored discrepancy. High-severity ones
//! block payment until the AP reviewer resolves them; a resolution of
//! "dispute" opens a vendor dispute that blocks payment in turn. Whatever
//! gets through is paid at the invoice total minus approved adjustments, on
//! the date that captures the early-payment discount when the terms allow.

use super::{next_exception, rejection_reasons, Outcome};
use crate::activity::{ActivityCall, DisputeTicket, LineVariance, PaymentConfirmation};
use crate::audit::AuditEvent;
use crate::config::ReconciliationConfig;
use crate::model::{
    Discrepancy, DiscrepancyKind, ExceptionKind, ExceptionStatus, InstanceStatus, Invoice,
    PaymentSchedule, PaymentTerms, PurchaseOrder, Receipt, Severity, TimerPurpose, WorkflowType,
};
use crate::runtime::escalation::{
    await_exceptions, ExceptionOutcome, ExceptionWait, TimeoutFallback,
};
use crate::runtime::{ExecutionError, WorkflowContext};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use tracing::info;

type Result<T> = std::result::Result<T, ExecutionError>;

pub(super) async fn run(ctx: &mut WorkflowContext) -> Result<Outcome> {
    let invoice = ctx
        .state()
        .payload
        .invoice()
        .cloned()
        .ok_or(ExecutionError::PayloadMismatch(WorkflowType::Reconciliation))?;
    let config = ctx.config();
    let config = &config.reconciliation;

    ctx.set_status(InstanceStatus::Matching).await?;

    let discrepancies = three_way_match(ctx, &invoice, config).await?;
    if !discrepancies.is_empty() {
        info!(
            "Discrepancies found: instance={}, invoice={}, count={}",
            ctx.id(),
            invoice.invoice_number,
            discrepancies.len()
        );
        ctx.record(AuditEvent::DiscrepanciesFound {
            discrepancies: discrepancies.clone(),
        })
        .await?;
    }

    let blocking: Vec<&Discrepancy> = discrepancies
        .iter()
        .filter(|d| d.severity.blocks_payment())
        .collect();
    if !blocking.is_empty() {
        for discrepancy in blocking {
            let exception = next_exception(
                ctx,
                ExceptionKind::Discrepancy,
                format!("{}: {}", discrepancy.kind, discrepancy.description),
                config.ap_reviewer.clone(),
            )
            .for_discrepancy(discrepancy.id.clone());
            raise(ctx, &invoice, exception).await?;
        }
        ctx.set_status(InstanceStatus::AwaitingExceptions).await?;

        let wait = ExceptionWait {
            purpose: TimerPurpose::ExceptionTimeout,
            timeout: config.exception_timeout,
            fallback: TimeoutFallback::Expire,
            allow_dispute: true,
        };
        if let Some(outcome) = settle(ctx, &wait, InstanceStatus::Exception).await? {
            return Ok(outcome);
        }

        let disputed: Vec<_> = ctx
            .state()
            .exceptions
            .iter()
            .filter(|e| e.status == ExceptionStatus::Disputed)
            .cloned()
            .collect();
        if !disputed.is_empty() {
            for exception in disputed {
                let ticket: DisputeTicket = ctx
                    .call(ActivityCall::CreateVendorDispute {
                        invoice_id: invoice.invoice_id.clone(),
                        vendor_id: invoice.vendor_id.clone(),
                        exception_id: exception.id.clone(),
                        description: exception.description.clone(),
                    })
                    .await?;
                ctx.record(AuditEvent::DisputeOpened {
                    exception_id: exception.id.clone(),
                    dispute_id: ticket.dispute_id.clone(),
                })
                .await?;

                let mut followup = next_exception(
                    ctx,
                    ExceptionKind::VendorDispute,
                    format!(
                        "Vendor dispute {} for {}: {}",
                        ticket.dispute_id, exception.id, exception.description
                    ),
                    config.ap_reviewer.clone(),
                );
                followup.discrepancy_id = exception.discrepancy_id.clone();
                followup.dispute_id = Some(ticket.dispute_id);
                raise(ctx, &invoice, followup).await?;
            }
            ctx.set_status(InstanceStatus::AwaitingDispute).await?;

            let wait = ExceptionWait {
                purpose: TimerPurpose::DisputeTimeout,
                timeout: config.dispute_timeout,
                fallback: TimeoutFallback::Expire,
                allow_dispute: false,
            };
            if let Some(outcome) = settle(ctx, &wait, InstanceStatus::Disputed).await? {
                return Ok(outcome);
            }
        }
    }

    ctx.set_status(InstanceStatus::SchedulingPayment).await?;
    let terms = invoice.terms.unwrap_or(config.default_terms);
    let adjustments = ctx.state().approved_adjustments();
    let decided_on = ctx.state().last_event_at.date_naive();
    let plan = plan_payment(&invoice, terms, adjustments, decided_on);

    let confirmation: PaymentConfirmation = ctx
        .call(ActivityCall::SchedulePayment {
            invoice_id: invoice.invoice_id.clone(),
            vendor_id: invoice.vendor_id.clone(),
            amount: plan.amount,
            payment_date: plan.payment_date,
        })
        .await?;
    info!(
        "Payment scheduled: instance={}, invoice={}, amount={}, date={}",
        ctx.id(),
        invoice.invoice_number,
        plan.amount,
        plan.payment_date
    );
    ctx.record(AuditEvent::PaymentScheduled {
        schedule: PaymentSchedule {
            amount: plan.amount,
            payment_date: plan.payment_date,
            adjustments,
            discount: plan.discount,
            payment_id: confirmation.payment_id,
        },
    })
    .await?;

    Ok(Outcome::new(InstanceStatus::Matched))
}

async fn raise(
    ctx: &mut WorkflowContext,
    invoice: &Invoice,
    exception: crate::model::ExceptionCase,
) -> Result<()> {
    let recipient = exception.approver.clone();
    let subject = format!(
        "Invoice {} blocked: {} ({})",
        invoice.invoice_number, exception.description, exception.id
    );
    ctx.record(AuditEvent::ExceptionRaised { exception }).await?;
    ctx.perform(ActivityCall::NotifyApprover {
        instance_id: ctx.id(),
        recipient,
        subject,
        reminder: false,
    })
    .await
}

/// Waits out one exception round. Returns the terminal outcome if the round
/// ended the instance.
async fn settle(
    ctx: &mut WorkflowContext,
    wait: &ExceptionWait,
    on_timeout: InstanceStatus,
) -> Result<Option<Outcome>> {
    let waited = await_exceptions(ctx, wait).await?;
    if let Some(reasons) = rejection_reasons(ctx) {
        return Ok(Some(Outcome::because(InstanceStatus::Rejected, reasons)));
    }
    Ok(match waited {
        ExceptionOutcome::Resolved => None,
        ExceptionOutcome::TimedOut { pending } => Some(Outcome::because(
            on_timeout,
            format!(
                "Unresolved after {} days: {}",
                wait.timeout.as_secs() / 86_400,
                pending.join(", ")
            ),
        )),
    })
}

async fn three_way_match(
    ctx: &mut WorkflowContext,
    invoice: &Invoice,
    config: &ReconciliationConfig,
) -> Result<Vec<Discrepancy>> {
    let mut found = Vec::new();
    let mut add = |kind, severity, description: String, variance: Option<&LineVariance>| {
        found.push(Discrepancy {
            id: format!("DSC-{}", found.len() + 1),
            kind,
            severity,
            description,
            line_id: variance.map(|v| v.line_id.clone()),
            expected: variance.map(|v| v.expected),
            actual: variance.map(|v| v.actual),
        });
    };

    let po: Option<PurchaseOrder> = ctx
        .call(ActivityCall::FindMatchingPo {
            vendor_id: invoice.vendor_id.clone(),
            po_number: invoice.po_number.clone(),
            amount: invoice.total,
        })
        .await?;
    let Some(po) = po else {
        add(
            DiscrepancyKind::NoPo,
            Severity::High,
            format!("No purchase order matches invoice {}", invoice.invoice_number),
            None,
        );
        return Ok(found);
    };

    if po.vendor_id != invoice.vendor_id {
        add(
            DiscrepancyKind::VendorMismatch,
            Severity::High,
            format!(
                "Invoice vendor {} does not match PO {} vendor {}",
                invoice.vendor_id, po.po_number, po.vendor_id
            ),
            None,
        );
    }

    let receipt: Option<Receipt> = ctx
        .call(ActivityCall::FindMatchingReceipt {
            po_number: po.po_number.clone(),
        })
        .await?;
    match receipt {
        None => add(
            DiscrepancyKind::MissingReceipt,
            Severity::High,
            format!("No goods receipt recorded against PO {}", po.po_number),
            None,
        ),
        Some(receipt) => {
            let variances: Vec<LineVariance> = ctx
                .call(ActivityCall::VerifyQuantities {
                    invoice_lines: invoice.line_items.clone(),
                    receipt,
                })
                .await?;
            for variance in &variances {
                let severity = score(variance, config.quantity_low, config.quantity_medium);
                add(
                    DiscrepancyKind::QuantityMismatch,
                    severity,
                    format!(
                        "Line {} invoiced {} but {} received",
                        variance.line_id, variance.actual, variance.expected
                    ),
                    Some(variance),
                );
            }
        }
    }

    let variances: Vec<LineVariance> = ctx
        .call(ActivityCall::VerifyPricing {
            invoice_lines: invoice.line_items.clone(),
            purchase_order: po.clone(),
        })
        .await?;
    for variance in &variances {
        let severity = score(variance, config.price_low, config.price_medium);
        add(
            DiscrepancyKind::PriceVariance,
            severity,
            format!(
                "Line {} billed at {} against PO price {}",
                variance.line_id, variance.actual, variance.expected
            ),
            Some(variance),
        );
    }

    Ok(found)
}

/// Lines with nothing expected at all are always High.
fn score(variance: &LineVariance, low: Decimal, medium: Decimal) -> Severity {
    variance
        .ratio()
        .map_or(Severity::High, |ratio| Severity::from_variance(ratio, low, medium))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PaymentPlan {
    amount: Decimal,
    payment_date: NaiveDate,
    discount: Option<Decimal>,
}

/// Chooses amount and date. The amount is always the invoice total less
/// approved adjustments; a captured discount is reported next to it, not
/// deducted from it. `decided_on` is the date the last blocking decision was
/// recorded; a discount window that already closed by then is not taken.
fn plan_payment(
    invoice: &Invoice,
    terms: PaymentTerms,
    adjustments: Decimal,
    decided_on: NaiveDate,
) -> PaymentPlan {
    let amount = (invoice.total - adjustments).max(Decimal::ZERO);
    let after = |days: u32| {
        invoice
            .invoice_date
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(invoice.invoice_date)
    };

    let discount_deadline = after(terms.discount_days);
    if terms.has_discount() && decided_on <= discount_deadline {
        let discount = (amount * terms.discount_percent / Decimal::ONE_HUNDRED).round_dp(2);
        return PaymentPlan {
            amount,
            payment_date: discount_deadline,
            discount: Some(discount),
        };
    }

    PaymentPlan {
        amount,
        payment_date: after(terms.net_days).max(decided_on),
        discount: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn invoice(total: &str) -> Invoice {
        Invoice {
            invoice_id: "INV-1".into(),
            invoice_number: "A-100".into(),
            vendor_id: "V-1".into(),
            po_number: Some("PO-1".into()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            total: dec(total),
            line_items: vec![],
            terms: None,
        }
    }

    #[test]
    fn test_discount_captured_inside_window() {
        let terms: PaymentTerms = "2/10 net 30".parse().unwrap();
        let plan = plan_payment(
            &invoice("1000.00"),
            terms,
            Decimal::ZERO,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        );
        assert_eq!(plan.payment_date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(plan.discount, Some(dec("20.00")));
        assert_eq!(plan.amount, dec("1000.00"));
    }

    #[test]
    fn test_missed_window_pays_net() {
        let terms: PaymentTerms = "2/10 net 30".parse().unwrap();
        let plan = plan_payment(
            &invoice("1000.00"),
            terms,
            dec("50"),
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
        );
        assert_eq!(plan.payment_date, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(plan.discount, None);
        assert_eq!(plan.amount, dec("950.00"));
    }

    #[test]
    fn test_late_decision_pays_on_decision_date() {
        let plan = plan_payment(
            &invoice("10"),
            PaymentTerms::net(30),
            Decimal::ZERO,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );
        assert_eq!(plan.payment_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn test_variance_scoring() {
        let variance = |expected: &str, actual: &str| LineVariance {
            line_id: "1".into(),
            expected: dec(expected),
            actual: dec(actual),
        };
        assert_eq!(score(&variance("100", "101"), dec("0.02"), dec("0.05")), Severity::Low);
        assert_eq!(score(&variance("100", "104"), dec("0.02"), dec("0.05")), Severity::Medium);
        assert_eq!(score(&variance("100", "120"), dec("0.02"), dec("0.05")), Severity::High);
        assert_eq!(score(&variance("0", "3"), dec("0.02"), dec("0.05")), Severity::High);
    }
}
