//! Engine configuration.
//!
//! Every knob has a default matching the reference procurement office, so
//! `EngineConfig::default()` is enough for demos and most tests. Durations
//! serialize as `{ secs, nanos }` like any other `std::time::Duration`.

use crate::core::RetryPolicy;
use crate::model::{PaymentTerms, Urgency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DAY: u64 = 86_400;

/// Top-level configuration handed to [`Engine`](crate::runtime::Engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub activity: ActivityConfig,
    pub compliance: ComplianceConfig,
    pub approval: ApprovalConfig,
    pub reconciliation: ReconciliationConfig,
}

impl EngineConfig {
    pub fn with_activity(mut self, activity: ActivityConfig) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_compliance(mut self, compliance: ComplianceConfig) -> Self {
        self.compliance = compliance;
        self
    }

    pub fn with_approval(mut self, approval: ApprovalConfig) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_reconciliation(mut self, reconciliation: ReconciliationConfig) -> Self {
        self.reconciliation = reconciliation;
        self
    }
}

// ============================================================================
// Activities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Per-attempt timeout unless overridden below.
    pub default_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Keyed by activity name, e.g. `"schedule_payment"`.
    pub timeouts: HashMap<String, Duration>,
    /// Policy for handing closed trails to the archive.
    pub archive_retry_policy: RetryPolicy,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::STANDARD,
            timeouts: HashMap::new(),
            archive_retry_policy: RetryPolicy::AGGRESSIVE,
        }
    }
}

impl ActivityConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout(mut self, activity: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(activity.into(), timeout);
        self
    }

    pub fn timeout_for(&self, activity: &str) -> Duration {
        self.timeouts
            .get(activity)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

// ============================================================================
// Policy compliance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Global bound on the open exception set.
    pub exception_timeout: Duration,
    /// Notified when the exception set times out.
    pub administrator: String,
    /// Wait after notifying the administrator before settling on
    /// `exception_pending`.
    pub admin_grace_period: Duration,
    pub budget_officer: String,
    pub procurement_officer: String,
    pub compliance_officer: String,
    /// Categories grant funds may never be spent on without PI sign-off.
    pub restricted_grant_categories: Vec<String>,
    /// Single-purchase limit above which the budget officer must sign off.
    pub spending_limit: Decimal,
    /// Competitive bidding applies strictly above these totals.
    pub federal_bidding_threshold: Decimal,
    pub institutional_bidding_threshold: Decimal,
    pub minimum_quotes: u32,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            exception_timeout: Duration::from_secs(14 * DAY),
            administrator: "compliance-admin".to_string(),
            admin_grace_period: Duration::from_secs(2 * DAY),
            budget_officer: "budget-officer".to_string(),
            procurement_officer: "procurement-officer".to_string(),
            compliance_officer: "compliance-officer".to_string(),
            restricted_grant_categories: ["entertainment", "alcohol", "gifts", "personal"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            spending_limit: Decimal::from(50_000),
            federal_bidding_threshold: Decimal::from(10_000),
            institutional_bidding_threshold: Decimal::from(25_000),
            minimum_quotes: 3,
        }
    }
}

impl ComplianceConfig {
    pub fn with_exception_timeout(mut self, timeout: Duration) -> Self {
        self.exception_timeout = timeout;
        self
    }

    pub fn with_administrator(mut self, administrator: impl Into<String>, grace: Duration) -> Self {
        self.administrator = administrator.into();
        self.admin_grace_period = grace;
        self
    }

    pub fn with_spending_limit(mut self, limit: Decimal) -> Self {
        self.spending_limit = limit;
        self
    }

    pub fn is_restricted(&self, category: &str) -> bool {
        self.restricted_grant_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}

// ============================================================================
// Approval routing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Multiplier on every stage's reminder interval for rush requests.
    pub rush_factor: f64,
    pub emergency_factor: f64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            rush_factor: 0.5,
            emergency_factor: 0.25,
        }
    }
}

impl ApprovalConfig {
    pub fn urgency_factor(&self, urgency: Urgency) -> f64 {
        match urgency {
            Urgency::Standard => 1.0,
            Urgency::Rush => self.rush_factor,
            Urgency::Emergency => self.emergency_factor,
        }
    }
}

// ============================================================================
// Payment reconciliation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub exception_timeout: Duration,
    pub dispute_timeout: Duration,
    pub ap_reviewer: String,
    /// Relative price variance up to which a line is Low / Medium severity.
    pub price_low: Decimal,
    pub price_medium: Decimal,
    pub quantity_low: Decimal,
    pub quantity_medium: Decimal,
    /// Used when an invoice carries no terms.
    pub default_terms: PaymentTerms,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            exception_timeout: Duration::from_secs(30 * DAY),
            dispute_timeout: Duration::from_secs(60 * DAY),
            ap_reviewer: "ap-reviewer".to_string(),
            price_low: Decimal::new(2, 2),
            price_medium: Decimal::new(5, 2),
            quantity_low: Decimal::new(5, 2),
            quantity_medium: Decimal::new(10, 2),
            default_terms: PaymentTerms::default(),
        }
    }
}

impl ReconciliationConfig {
    pub fn with_ap_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.ap_reviewer = reviewer.into();
        self
    }

    pub fn with_timeouts(mut self, exception_timeout: Duration, dispute_timeout: Duration) -> Self {
        self.exception_timeout = exception_timeout;
        self.dispute_timeout = dispute_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.compliance.exception_timeout, Duration::from_secs(14 * DAY));
        assert_eq!(config.reconciliation.exception_timeout, Duration::from_secs(30 * DAY));
        assert_eq!(config.reconciliation.dispute_timeout, Duration::from_secs(60 * DAY));
        assert_eq!(config.activity.retry_policy, RetryPolicy::STANDARD);
        assert!(config.compliance.is_restricted("Entertainment"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "reconciliation": { "ap_reviewer": "pat" }
        }))
        .unwrap();
        assert_eq!(config.reconciliation.ap_reviewer, "pat");
        assert_eq!(config.reconciliation.price_low, Decimal::new(2, 2));
        assert_eq!(config.compliance, ComplianceConfig::default());
    }

    #[test]
    fn test_activity_timeout_override() {
        let activity =
            ActivityConfig::default().with_timeout("schedule_payment", Duration::from_secs(5));
        assert_eq!(activity.timeout_for("schedule_payment"), Duration::from_secs(5));
        assert_eq!(activity.timeout_for("check_debarment"), Duration::from_secs(30));
    }
}
