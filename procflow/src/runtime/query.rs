//! Query interface.
//!
//! An [`InstanceView`] is an owned snapshot: reading it never blocks or
//! mutates the instance it came from.

use crate::model::{
    Discrepancy, ExceptionCase, InstanceState, InstanceStatus, PaymentSchedule, StageState,
    WorkflowType,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceView {
    state: InstanceState,
}

impl InstanceView {
    pub(crate) fn new(state: InstanceState) -> Self {
        Self { state }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.state.workflow_type
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.status
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal reason, e.g. the joined rejection reasons of a violation.
    pub fn reason(&self) -> Option<&str> {
        self.state.reason.as_deref()
    }

    pub fn current_stage(&self) -> Option<&StageState> {
        self.state.current_stage()
    }

    /// The primary approver of the active stage, or the approver of the
    /// first open exception.
    pub fn pending_approver(&self) -> Option<String> {
        if let Some(stage) = self.state.current_stage() {
            return Some(stage.stage.approver.clone());
        }
        if self.state.is_terminal() {
            return None;
        }
        self.state
            .exceptions
            .iter()
            .find(|exception| exception.is_pending())
            .map(|exception| exception.approver.clone())
    }

    /// Everyone whose decision would currently be accepted.
    pub fn pending_approvers(&self) -> Vec<String> {
        self.state.pending_approvers()
    }

    pub fn stages(&self) -> &[StageState] {
        &self.state.stages
    }

    pub fn completed_approvals(&self) -> Vec<&StageState> {
        self.state.completed_approvals()
    }

    pub fn exceptions(&self) -> &[ExceptionCase] {
        &self.state.exceptions
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.state.discrepancies
    }

    pub fn purchase_order(&self) -> Option<&str> {
        self.state.purchase_order.as_deref()
    }

    pub fn payment(&self) -> Option<&PaymentSchedule> {
        self.state.payment.as_ref()
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn into_state(self) -> InstanceState {
        self.state
    }
}
