//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ExecutionConfig;
use crate::error::ProviderError;

/// Retry schedule for retryable provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling of the computed backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    ///
    /// Doubles from `base_delay` up to `max_delay`; a provider-supplied
    /// retry-after hint is honored when it asks for longer.
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        error
            .retry_after_secs
            .map(Duration::from_secs)
            .map_or(backoff, |hint| hint.max(backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self::new(
            config.max_attempts.max(1),
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

/// Runs `call` until it succeeds, fails terminally, or runs out of attempts.
///
/// Returns the result together with the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &e);
                warn!(
                    "{what} failed ({e}), retrying in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt + 1,
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let transient = ProviderError::transient("reset");
        assert_eq!(policy.delay_for(1, &transient), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, &transient), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(5, &transient), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(30, &transient), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_after_hint_is_honored() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, &ProviderError::throttled(3)),
            Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(2));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let (result, attempts) = with_retry(&policy, "create", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::transient("reset"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(2));
        let (result, attempts): (Result<(), _>, _) = with_retry(&policy, "create", || async {
            Err(ProviderError::invalid_input("bad cidr"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));
        let (result, attempts): (Result<(), _>, _) = with_retry(&policy, "delete", || async {
            Err(ProviderError::transient("unavailable"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
