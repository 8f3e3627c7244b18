//! Workflow definitions.
//!
//! Each definition is a plain async function over a [`WorkflowContext`]. It
//! may only touch the outside world through activities, timers and signals
//! provided by the context; the runtime records each of them, which is what
//! lets the same function resume an instance after a crash.

mod approval;
mod compliance;
mod reconciliation;

use crate::model::{ExceptionCase, ExceptionKind, InstanceStatus, WorkflowType};
use crate::runtime::{ExecutionError, WorkflowContext};

/// Terminal status a workflow settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub status: InstanceStatus,
    pub reason: Option<String>,
}

impl Outcome {
    pub(crate) fn new(status: InstanceStatus) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub(crate) fn because(status: InstanceStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }
}

pub(crate) async fn run(ctx: &mut WorkflowContext) -> Result<Outcome, ExecutionError> {
    match ctx.state().workflow_type {
        WorkflowType::Compliance => compliance::run(ctx).await,
        WorkflowType::Approval => approval::run(ctx).await,
        WorkflowType::Reconciliation => reconciliation::run(ctx).await,
    }
}

/// Builds the next exception case, numbered `EXC-n` in raise order.
fn next_exception(
    ctx: &WorkflowContext,
    kind: ExceptionKind,
    description: impl Into<String>,
    approver: impl Into<String>,
) -> ExceptionCase {
    let id = format!("EXC-{}", ctx.state().exceptions.len() + 1);
    ExceptionCase::new(id, kind, description, approver)
}

/// Rejection reasons of all rejected exceptions, joined for the terminal
/// reason.
fn rejection_reasons(ctx: &WorkflowContext) -> Option<String> {
    let reasons: Vec<String> = ctx
        .state()
        .exceptions
        .iter()
        .filter_map(ExceptionCase::rejection_reason)
        .collect();
    (!reasons.is_empty()).then(|| reasons.join("; "))
}
