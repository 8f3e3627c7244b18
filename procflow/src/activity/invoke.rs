use super::{ActivityError, ActivityInvocation, ActivityInvoker};
use crate::core::retry_with_policy;

/// Runs one invocation under its timeout and retry policy.
///
/// Returns the final outcome and how many attempts it took. Each attempt is
/// bounded by `invocation.timeout`; an attempt that overruns counts as a
/// retryable [`ActivityError::Timeout`].
pub async fn invoke_with_policy(
    invoker: &dyn ActivityInvoker,
    invocation: &ActivityInvocation,
) -> (Result<serde_json::Value, ActivityError>, u32) {
    retry_with_policy(invocation.retry_policy, |attempt| async move {
        tracing::trace!(
            "Invoking activity: name={}, key={}, attempt={}",
            invocation.name,
            invocation.idempotency_key,
            attempt
        );
        match tokio::time::timeout(invocation.timeout, invoker.invoke(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::Timeout {
                activity: invocation.name.to_string(),
                timeout: invocation.timeout,
            }),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityCall;
    use crate::core::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Slow {
        calls: AtomicU32,
        fast_after: u32,
    }

    #[async_trait]
    impl ActivityInvoker for Slow {
        async fn invoke(
            &self,
            _invocation: &ActivityInvocation,
        ) -> Result<serde_json::Value, ActivityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fast_after {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(serde_json::json!({ "attempt": n }))
        }
    }

    fn invocation() -> ActivityInvocation {
        ActivityInvocation::new(
            ActivityCall::CheckRegistration {
                vendor_id: "V-1".into(),
            },
            "i:1:check_registration".into(),
        )
        .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let slow = Slow {
            calls: AtomicU32::new(0),
            fast_after: 1,
        };

        let (result, attempts) = invoke_with_policy(&slow, &invocation()).await;
        assert_eq!(result.unwrap()["attempt"], 2);
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhausts_budget() {
        let slow = Slow {
            calls: AtomicU32::new(0),
            fast_after: u32::MAX,
        };

        let invocation = invocation().with_retry_policy(RetryPolicy::with_max_attempts(2));
        let (result, attempts) = invoke_with_policy(&slow, &invocation).await;
        assert!(matches!(result, Err(ActivityError::Timeout { .. })));
        assert_eq!(attempts, 2);
    }
}
