//! Retry policy shared by the embedding and generation call sites.
//!
//! A [`RetryPolicy`] retries transient [`ProviderError`]s with exponential
//! backoff (`base, 2·base, 4·base, …`, capped at `max_backoff`) until a
//! wall-clock budget is spent. A retry is never started if its sleep would
//! end past the budget, so one logical call takes at most roughly
//! `max_elapsed` plus the duration of the final attempt.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{ProviderError, RetryFailure};

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = fn(&ProviderError) -> bool;

#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_elapsed: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub retryable: RetryPredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_elapsed", &self.max_elapsed)
            .field("backoff_base", &self.backoff_base)
            .field("max_backoff", &self.max_backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_elapsed: Duration, backoff_base: Duration) -> Self {
        Self {
            max_elapsed,
            backoff_base,
            max_backoff: backoff_base * 32,
            retryable: ProviderError::is_transient,
        }
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[must_use]
    pub fn with_predicate(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// # Errors
    ///
    /// Returns a [`RetryFailure`] carrying the last provider error and the
    /// number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let delay = self.delay_for(attempts);
            let elapsed = start.elapsed();
            if !(self.retryable)(&err) || elapsed + delay > self.max_elapsed {
                return Err(RetryFailure {
                    label: label.to_string(),
                    attempts,
                    elapsed,
                    source: err,
                });
            }

            tracing::warn!(
                call = label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(200), Duration::from_millis(5))
            .with_max_backoff(Duration::from_millis(20))
    }

    fn server_error() -> ProviderError {
        ProviderError::Status {
            provider: "test".into(),
            status: 503,
            body: "overloaded".into(),
        }
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(60), Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(700));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(700));
        assert_eq!(policy.delay_for(40), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ProviderError>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(server_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast_policy()
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ProviderError::Status {
                        provider: "test".into(),
                        status: 401,
                        body: "bad key".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_retrying() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = fast_policy()
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::Timeout) }
            })
            .await
            .unwrap_err();
        assert!(err.attempts > 1);
        assert_eq!(err.attempts, calls.load(Ordering::SeqCst));
        assert!(matches!(err.source, ProviderError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let calls = AtomicU32::new(0);
        let err = fast_policy()
            .with_predicate(|_| false)
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
