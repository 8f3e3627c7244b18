use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// What happens when a stage's grace period expires without a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FallbackAction {
    /// Record a system rejection and end the approval chain.
    AutoReject { reason: String },
    /// Hand the stage to an administrator for one more grace window, then
    /// reject it.
    NotifyAdministrator { administrator: String },
}

impl FallbackAction {
    pub const TIMEOUT_REASON: &'static str = "Approval timeout - no response received.";
    pub const ADMINISTRATOR_TIMEOUT_REASON: &'static str =
        "Approval timeout - no administrator response received.";

    pub fn auto_reject() -> Self {
        FallbackAction::AutoReject {
            reason: Self::TIMEOUT_REASON.to_string(),
        }
    }
}

/// Reminder cadence, escalation target and final fallback for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub reminder_interval: Duration,
    pub max_reminders: u32,
    pub escalate_to: Option<String>,
    /// Extended wait after escalating, before the fallback fires.
    pub grace_period: Duration,
    pub fallback: FallbackAction,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            reminder_interval: Duration::from_secs(3 * 86_400),
            max_reminders: 2,
            escalate_to: None,
            grace_period: Duration::from_secs(2 * 86_400),
            fallback: FallbackAction::auto_reject(),
        }
    }
}

impl EscalationPolicy {
    pub fn with_escalate_to(mut self, actor: impl Into<String>) -> Self {
        self.escalate_to = Some(actor.into());
        self
    }

    pub fn with_reminders(mut self, interval: Duration, max_reminders: u32) -> Self {
        self.reminder_interval = interval;
        self.max_reminders = max_reminders;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackAction) -> Self {
        self.fallback = fallback;
        self
    }

    /// Reminder interval scaled for urgency. Never shorter than one minute.
    /// A non-finite factor leaves the interval unscaled.
    pub fn scaled_interval(&self, factor: f64) -> Duration {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let scaled = self.reminder_interval.mul_f64(factor);
        scaled.max(Duration::from_secs(60))
    }
}

/// One decision checkpoint in an approval chain, as planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub order: u32,
    /// Org role that owns the stage ("supervisor", "dean", "pi", ...).
    pub role: String,
    pub approver: String,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    /// Activation predicate: the stage only runs at or above this amount.
    #[serde(default)]
    pub min_amount: Option<Decimal>,
}

impl Stage {
    pub fn new(
        order: u32,
        role: impl Into<String>,
        name: impl Into<String>,
        approver: impl Into<String>,
    ) -> Self {
        let role = role.into();
        Self {
            id: format!("{}-{}", order, role),
            name: name.into(),
            order,
            role,
            approver: approver.into(),
            escalation: EscalationPolicy::default(),
            min_amount: None,
        }
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_min_amount(mut self, amount: Decimal) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn applies_to(&self, amount: Decimal) -> bool {
        self.min_amount.map_or(true, |min| amount >= min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Approved,
    Rejected,
    Returned,
    Skipped,
}

impl StageStatus {
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            StageStatus::Approved | StageStatus::Rejected | StageStatus::Returned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDecision {
    pub actor: String,
    pub comment: Option<String>,
}

/// A planned stage plus everything that happened to it in this instance.
///
/// The delegate set and escalation target live here, on the instance's own
/// copy, so nothing leaks into the next stage or into another instance
/// planned from the same chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage: Stage,
    pub status: StageStatus,
    pub delegates: BTreeSet<String>,
    pub reminders_sent: u32,
    pub escalated_to: Option<String>,
    pub escalated: bool,
    pub administrator: Option<String>,
    pub decision: Option<StageDecision>,
}

impl StageState {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            delegates: BTreeSet::new(),
            reminders_sent: 0,
            escalated_to: None,
            escalated: false,
            administrator: None,
            decision: None,
        }
    }

    /// Primary approver, delegates, escalation target and administrator.
    pub fn authorized_actors(&self) -> BTreeSet<String> {
        let mut actors = self.delegates.clone();
        actors.insert(self.stage.approver.clone());
        actors.extend(self.escalated_to.iter().cloned());
        actors.extend(self.administrator.iter().cloned());
        actors
    }

    pub fn is_authorized(&self, actor: &str) -> bool {
        self.stage.approver == actor
            || self.delegates.contains(actor)
            || self.escalated_to.as_deref() == Some(actor)
            || self.administrator.as_deref() == Some(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_actor_set_grows_with_delegation_and_escalation() {
        let stage = Stage::new(1, "supervisor", "Supervisor review", "bob")
            .with_escalation(EscalationPolicy::default().with_escalate_to("carol"));
        let mut state = StageState::new(stage);

        assert!(state.is_authorized("bob"));
        assert!(!state.is_authorized("dave"));
        assert!(!state.is_authorized("carol"));

        state.delegates.insert("dave".into());
        state.escalated_to = state.stage.escalation.escalate_to.clone();

        let actors: Vec<_> = state.authorized_actors().into_iter().collect();
        assert_eq!(actors, vec!["bob", "carol", "dave"]);
    }

    #[test]
    fn test_activation_predicate() {
        let stage =
            Stage::new(3, "dean", "Dean review", "erin").with_min_amount(Decimal::from(100_000));
        assert!(!stage.applies_to(Decimal::from(99_999)));
        assert!(stage.applies_to(Decimal::from(100_000)));
        assert!(Stage::new(1, "pi", "PI review", "pat").applies_to(Decimal::ONE));
    }

    #[test]
    fn test_urgency_scaling_has_a_floor() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.scaled_interval(1.0), policy.reminder_interval);
        assert_eq!(policy.scaled_interval(0.5), Duration::from_secs(3 * 43_200));
        assert_eq!(policy.scaled_interval(0.0), Duration::from_secs(60));
    }

    #[test]
    fn test_non_finite_urgency_factor_keeps_interval() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.scaled_interval(f64::NAN), policy.reminder_interval);
        assert_eq!(policy.scaled_interval(f64::INFINITY), policy.reminder_interval);
        assert_eq!(policy.scaled_interval(f64::NEG_INFINITY), policy.reminder_interval);
        assert_eq!(policy.scaled_interval(7.5), policy.reminder_interval);
    }
}
