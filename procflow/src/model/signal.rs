//! Externally originated decisions.
//!
//! Signals are a closed sum type validated once at the ingress boundary
//! ([`Signal::validate`]); the runtime only ever sees well-formed values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Approve,
    Reject,
    /// Reconciliation only: open a vendor dispute for the discrepancy.
    Dispute,
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionAction::Approve => "approve",
            ResolutionAction::Reject => "reject",
            ResolutionAction::Dispute => "dispute",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    Approve {
        actor: String,
        #[serde(default)]
        comment: Option<String>,
        /// Pins the decision to one stage; a decision for any other stage is
        /// rejected as stale.
        #[serde(default)]
        stage_id: Option<String>,
    },
    Reject {
        actor: String,
        reason: String,
        #[serde(default)]
        stage_id: Option<String>,
    },
    Return {
        actor: String,
        reason: String,
        return_to: String,
        #[serde(default)]
        stage_id: Option<String>,
    },
    Delegate {
        from: String,
        to: String,
        reason: String,
    },
    ResolveException {
        exception_id: String,
        action: ResolutionAction,
        actor: String,
        #[serde(default)]
        notes: Option<String>,
        /// Amount deducted from the payment when the resolution is approved.
        #[serde(default)]
        adjustment: Option<Decimal>,
    },
    Cancel {
        #[serde(default)]
        requested_by: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Approve,
    Reject,
    Return,
    Delegate,
    ResolveException,
    Cancel,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Approve => "approve",
            SignalKind::Reject => "reject",
            SignalKind::Return => "return",
            SignalKind::Delegate => "delegate",
            SignalKind::ResolveException => "resolve_exception",
            SignalKind::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SignalValidationError {
    #[error("{signal} signal is missing {field}")]
    MissingField {
        signal: SignalKind,
        field: &'static str,
    },

    #[error("cannot delegate from {0} to themselves")]
    SelfDelegation(String),

    #[error("adjustment must be non-negative, got {0}")]
    NegativeAdjustment(Decimal),

    #[error("adjustment is only valid when approving an exception")]
    AdjustmentWithoutApproval,
}

impl Signal {
    pub fn approve(actor: impl Into<String>) -> Self {
        Signal::Approve {
            actor: actor.into(),
            comment: None,
            stage_id: None,
        }
    }

    pub fn reject(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Signal::Reject {
            actor: actor.into(),
            reason: reason.into(),
            stage_id: None,
        }
    }

    pub fn return_to(
        actor: impl Into<String>,
        reason: impl Into<String>,
        return_to: impl Into<String>,
    ) -> Self {
        Signal::Return {
            actor: actor.into(),
            reason: reason.into(),
            return_to: return_to.into(),
            stage_id: None,
        }
    }

    pub fn delegate(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Signal::Delegate {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    pub fn resolve_exception(
        exception_id: impl Into<String>,
        action: ResolutionAction,
        actor: impl Into<String>,
    ) -> Self {
        Signal::ResolveException {
            exception_id: exception_id.into(),
            action,
            actor: actor.into(),
            notes: None,
            adjustment: None,
        }
    }

    pub fn cancel() -> Self {
        Signal::Cancel {
            requested_by: None,
            reason: None,
        }
    }

    /// Attach a comment (approve) or notes (resolve_exception).
    pub fn with_note(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Signal::Approve { comment, .. } => *comment = Some(text.into()),
            Signal::ResolveException { notes, .. } => *notes = Some(text.into()),
            Signal::Cancel { reason, .. } => *reason = Some(text.into()),
            _ => {}
        }
        self
    }

    pub fn with_adjustment(mut self, amount: Decimal) -> Self {
        if let Signal::ResolveException { adjustment, .. } = &mut self {
            *adjustment = Some(amount);
        }
        self
    }

    pub fn for_stage(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Signal::Approve { stage_id, .. }
            | Signal::Reject { stage_id, .. }
            | Signal::Return { stage_id, .. } => *stage_id = Some(id.into()),
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Approve { .. } => SignalKind::Approve,
            Signal::Reject { .. } => SignalKind::Reject,
            Signal::Return { .. } => SignalKind::Return,
            Signal::Delegate { .. } => SignalKind::Delegate,
            Signal::ResolveException { .. } => SignalKind::ResolveException,
            Signal::Cancel { .. } => SignalKind::Cancel,
        }
    }

    /// Identity the signal acts on behalf of. Cancels without a requester are
    /// attributed to "system".
    pub fn actor(&self) -> &str {
        match self {
            Signal::Approve { actor, .. }
            | Signal::Reject { actor, .. }
            | Signal::Return { actor, .. }
            | Signal::ResolveException { actor, .. } => actor,
            Signal::Delegate { from, .. } => from,
            Signal::Cancel { requested_by, .. } => requested_by.as_deref().unwrap_or("system"),
        }
    }

    pub fn validate(&self) -> Result<(), SignalValidationError> {
        let kind = self.kind();
        let missing = |field| SignalValidationError::MissingField {
            signal: kind,
            field,
        };

        match self {
            Signal::Approve { actor, .. } => non_empty(actor).ok_or_else(|| missing("actor")),
            Signal::Reject { actor, reason, .. } => {
                non_empty(actor).ok_or_else(|| missing("actor"))?;
                non_empty(reason).ok_or_else(|| missing("reason"))
            }
            Signal::Return {
                actor,
                reason,
                return_to,
                ..
            } => {
                non_empty(actor).ok_or_else(|| missing("actor"))?;
                non_empty(reason).ok_or_else(|| missing("reason"))?;
                non_empty(return_to).ok_or_else(|| missing("return_to"))
            }
            Signal::Delegate { from, to, reason } => {
                non_empty(from).ok_or_else(|| missing("from"))?;
                non_empty(to).ok_or_else(|| missing("to"))?;
                non_empty(reason).ok_or_else(|| missing("reason"))?;
                if from == to {
                    return Err(SignalValidationError::SelfDelegation(from.clone()));
                }
                Ok(())
            }
            Signal::ResolveException {
                exception_id,
                action,
                actor,
                adjustment,
                ..
            } => {
                non_empty(exception_id).ok_or_else(|| missing("exception_id"))?;
                non_empty(actor).ok_or_else(|| missing("actor"))?;
                match adjustment {
                    Some(amount) if amount.is_sign_negative() => {
                        Err(SignalValidationError::NegativeAdjustment(*amount))
                    }
                    Some(_) if *action != ResolutionAction::Approve => {
                        Err(SignalValidationError::AdjustmentWithoutApproval)
                    }
                    _ => Ok(()),
                }
            }
            Signal::Cancel { .. } => Ok(()),
        }
    }
}

fn non_empty(value: &str) -> Option<()> {
    (!value.trim().is_empty()).then_some(())
}

/// A validated signal stamped with the time the router accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub signal: Signal,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_catches_missing_fields() {
        assert!(Signal::approve("bob").validate().is_ok());
        assert_eq!(
            Signal::reject("bob", " ").validate(),
            Err(SignalValidationError::MissingField {
                signal: SignalKind::Reject,
                field: "reason"
            })
        );
        assert_eq!(
            Signal::delegate("bob", "bob", "vacation").validate(),
            Err(SignalValidationError::SelfDelegation("bob".into()))
        );
    }

    #[test]
    fn test_adjustment_rules() {
        let approve = Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "ap")
            .with_adjustment(Decimal::from(25));
        assert!(approve.validate().is_ok());

        let negative = Signal::resolve_exception("EXC-1", ResolutionAction::Approve, "ap")
            .with_adjustment(Decimal::from(-5));
        assert!(matches!(
            negative.validate(),
            Err(SignalValidationError::NegativeAdjustment(_))
        ));

        let dispute = Signal::resolve_exception("EXC-1", ResolutionAction::Dispute, "ap")
            .with_adjustment(Decimal::from(5));
        assert_eq!(
            dispute.validate(),
            Err(SignalValidationError::AdjustmentWithoutApproval)
        );
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let json = serde_json::to_value(Signal::approve("bob").for_stage("1-supervisor")).unwrap();
        assert_eq!(json["signal"], "approve");
        assert_eq!(json["stage_id"], "1-supervisor");

        let parsed: Signal =
            serde_json::from_str(r#"{"signal":"cancel","reason":"duplicate request"}"#).unwrap();
        assert_eq!(parsed.kind(), SignalKind::Cancel);
        assert_eq!(parsed.actor(), "system");
    }
}
