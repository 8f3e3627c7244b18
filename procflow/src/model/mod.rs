//! Domain data model.
//!
//! Plain data: payloads, stages, signals, exceptions and discrepancies, plus
//! [`InstanceState`], which is rebuilt from the audit trail by folding.

mod check;
mod discrepancy;
mod exception;
mod instance;
mod payload;
mod signal;
mod stage;
mod status;
mod timer;

pub use check::{CheckOutcome, CheckRecord, ComplianceCheck, ExceptionRequest};
pub use discrepancy::{Discrepancy, DiscrepancyKind, Severity};
pub use exception::{ExceptionCase, ExceptionKind, ExceptionStatus, Resolution};
pub use instance::{InstanceState, TransitionError};
pub use payload::{
    DomainPayload, FundingSource, GrantFunding, Invoice, LineItem, PaymentSchedule,
    PaymentTerms, PurchaseOrder, ReceivedLine, Receipt, Requisition, Urgency,
};
pub use signal::{ResolutionAction, Signal, SignalEnvelope, SignalKind, SignalValidationError};
pub use stage::{EscalationPolicy, FallbackAction, Stage, StageDecision, StageState, StageStatus};
pub use status::{InstanceStatus, WorkflowType};
pub use timer::{ActiveTimer, TimerPurpose};
