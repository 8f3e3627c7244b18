// =============================================================================
// ACTIVITY RETRY BEHAVIOR
// =============================================================================
//
// Activities talk to systems we do not own (the org directory, the vendor
// registry, the ERP). Two knobs decide what happens when one of them fails:
//
// 1. RETRY POLICY: how many attempts, and how long to wait between them.
// 2. RETRYABLE TRAIT: which errors are worth another attempt at all.
//    Validation failures and missing records are permanent; timeouts and
//    unavailable services are not.
//
// Only the final outcome of the retry loop is written to the audit trail.
// Intermediate attempts are visible in tracing output, never in the log.
// =============================================================================

use std::future::Future;
use std::time::Duration;

/// Configuration for activity retry behavior.
///
/// # Examples
///
/// ```
/// use procflow::RetryPolicy;
/// use std::time::Duration;
///
/// const DIRECTORY_RETRY: RetryPolicy = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(500),
///     max_delay: Duration::from_secs(20),
///     backoff_multiplier: 2.0,
/// };
///
/// assert_eq!(DIRECTORY_RETRY.delay_for_attempt(1), Some(Duration::from_millis(500)));
/// assert_eq!(DIRECTORY_RETRY.delay_for_attempt(5), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap on the exponential backoff.
    pub max_delay: Duration,

    /// Each retry delay is `min(initial_delay * backoff_multiplier^(attempt-1), max_delay)`.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Fail on the first error.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff_multiplier: 1.0,
    };

    /// Three attempts, 1s then 2s between them.
    ///
    /// This is the default for every activity the engine invokes.
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Ten attempts starting at 100ms, for sinks that must not lose data
    /// (the permanent audit archive).
    pub const AGGRESSIVE: Self = Self {
        max_attempts: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 1.5,
    };

    /// Standard delays with a custom attempt budget.
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed), or `None`
    /// when the budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as f64;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powf(exponent);

        Some(Duration::from_secs_f64(
            delay_secs.min(self.max_delay.as_secs_f64()),
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_attempts: u32) -> Self {
        Self::with_max_attempts(max_attempts)
    }
}

/// Classifies errors as transient or permanent.
///
/// Errors that return `false` stop the retry loop immediately and are
/// recorded as the activity's final outcome.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Runs `operation` until it succeeds, fails permanently, or exhausts the
/// policy. The closure receives the 1-indexed attempt number.
///
/// Returns the final result together with the number of attempts made.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: RetryPolicy,
    mut operation: F,
) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(error) => error,
        };

        if !error.is_retryable() {
            tracing::debug!("Activity failed with non-retryable error: {}", error);
            return (Err(error), attempt);
        }

        match policy.delay_for_attempt(attempt) {
            Some(delay) => {
                tracing::debug!(
                    "Activity failed (attempt {}/{}): {}. Retrying after {:?}",
                    attempt,
                    policy.max_attempts,
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                tracing::warn!(
                    "Activity exhausted retry attempts ({}/{}): {}",
                    attempt,
                    policy.max_attempts,
                    error
                );
                return (Err(error), attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        transient: bool,
    }

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.transient)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.transient
        }
    }

    #[test]
    fn test_standard_backoff_schedule() {
        let policy = RetryPolicy::STANDARD;
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_attempt(9), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_none_never_retries() {
        assert_eq!(RetryPolicy::NONE.delay_for_attempt(1), None);
        assert_eq!(RetryPolicy::from(4).max_attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);

        let (result, attempts) = retry_with_policy(RetryPolicy::STANDARD, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Flaky { transient: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);

        let (result, attempts) = retry_with_policy(RetryPolicy::AGGRESSIVE, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Flaky { transient: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_error() {
        let (result, attempts) = retry_with_policy(RetryPolicy::STANDARD, |_| async {
            Err::<(), _>(Flaky { transient: true })
        })
        .await;

        assert!(result.unwrap_err().transient);
        assert_eq!(attempts, 3);
    }
}
