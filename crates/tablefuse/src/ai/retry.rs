//! Bounded timeout and retry around AI calls.

use crate::ai::{AiClient, AiRequest, AiResponse};
use crate::core::config::AiCallConfig;
use crate::{Result, TableFuseError};
use std::future::Future;
use std::time::Duration;

/// Timeout and retry budget for one logical AI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for each individual attempt.
    pub timeout: Duration,
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubled after each subsequent attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AiCallConfig::default())
    }
}

impl From<&AiCallConfig> for RetryPolicy {
    fn from(config: &AiCallConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `op` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed deadline becomes
/// [`TableFuseError::Timeout`]. Only transient errors (see
/// [`TableFuseError::is_transient`]) are retried; anything else is returned
/// immediately.
pub async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(TableFuseError::Timeout(format!(
                "{} exceeded {:?} (attempt {})",
                label,
                policy.timeout,
                attempt + 1
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} failed with transient error, retrying in {:?} ({}/{}): {}",
                    label,
                    delay,
                    attempt + 1,
                    policy.max_retries,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Call `client` with `request` under `policy`.
pub async fn call_with_retry(client: &dyn AiClient, request: &AiRequest, policy: &RetryPolicy) -> Result<AiResponse> {
    let label = format!("AI call to '{}'", client.name());
    with_retry(&label, policy, || client.complete(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Plugin;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    struct FlakyClient {
        failures_before_success: usize,
        calls: AtomicUsize,
        error: fn() -> TableFuseError,
    }

    impl Plugin for FlakyClient {
        fn name(&self) -> &str {
            "flaky"
        }

        fn version(&self) -> String {
            "0.0.1".to_string()
        }
    }

    #[async_trait]
    impl AiClient for FlakyClient {
        async fn complete(&self, _request: &AiRequest) -> Result<AiResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err((self.error)())
            } else {
                Ok(AiResponse::new("{}"))
            }
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let client = FlakyClient {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
            error: || TableFuseError::network("connection reset"),
        };
        let response = call_with_retry(&client, &AiRequest::new("x"), &fast_policy(3))
            .await
            .unwrap();
        assert_eq!(response.text, "{}");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let client = FlakyClient {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
            error: || TableFuseError::network("unreachable"),
        };
        let err = call_with_retry(&client, &AiRequest::new("x"), &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TableFuseError::Network { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_content_errors_are_not_retried() {
        let client = FlakyClient {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
            error: || TableFuseError::ai("refused"),
        };
        let err = call_with_retry(&client, &AiRequest::new("x"), &fast_policy(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TableFuseError::Ai { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            max_retries: 1,
            backoff: Duration::from_millis(1),
        };

        let counter = Arc::clone(&calls);
        let result: Result<()> = with_retry("slow call", &policy, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(TableFuseError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }
}
