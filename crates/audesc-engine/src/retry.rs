//! Retry executor with exponential backoff and jitter.
//!
//! Wraps any call to an external collaborator. Retryability is decided by
//! the provider error's own classification; non-retryable failures
//! propagate without consuming further attempts. The policy is an
//! explicit value threaded into every call, never ambient state.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use audesc_providers::ProviderError;

/// Configuration for one retryable call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum total calls to the wrapped operation (initial + retries)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any computed delay, jitter included
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `retries` retries after the initial attempt.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries + 1;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("AUDESC_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            base_delay: Duration::from_millis(
                std::env::var("AUDESC_RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.base_delay.as_millis() as u64),
            ),
            max_delay: Duration::from_millis(
                std::env::var("AUDESC_RETRY_MAX_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.max_delay.as_millis() as u64),
            ),
            backoff_factor: defaults.backoff_factor,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max_attempts must be positive".to_string());
        }
        if self.backoff_factor < 1.0 {
            return Err("retry backoff_factor must be at least 1.0".to_string());
        }
        Ok(())
    }

    /// Backoff for the given zero-based attempt number, before jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Backoff with ±20% jitter, still capped at `max_delay`.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter).min(self.max_delay)
    }
}

/// Failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    /// The owning job was cancelled during a sleep or between attempts
    Cancelled,
    /// A non-retryable provider error; no further attempt was made
    NonRetryable { error: ProviderError, retries: u32 },
    /// A retryable provider error survived every attempt
    Exhausted { error: ProviderError, retries: u32 },
}

impl RetryError {
    /// Retries consumed before the failure.
    pub fn retries(&self) -> u32 {
        match self {
            RetryError::Cancelled => 0,
            RetryError::NonRetryable { retries, .. } | RetryError::Exhausted { retries, .. } => {
                *retries
            }
        }
    }

    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            RetryError::Cancelled => None,
            RetryError::NonRetryable { error, .. } | RetryError::Exhausted { error, .. } => {
                Some(error)
            }
        }
    }
}

/// Execute an operation with bounded retry and backoff.
///
/// Returns the value and the number of retries consumed. One tracing
/// event is emitted per attempt; that is the executor's only side effect
/// besides the call itself.
pub async fn execute<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    operation: F,
) -> Result<(T, u32), RetryError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            debug!(operation = operation_name, attempt, "aborting: cancelled");
            return Err(RetryError::Cancelled);
        }

        match operation().await {
            Ok(value) => {
                debug!(operation = operation_name, attempt, outcome = "success");
                return Ok((value, attempt));
            }
            Err(e) if !e.is_retryable() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    outcome = "non_retryable",
                    error = %e,
                );
                return Err(RetryError::NonRetryable {
                    error: e,
                    retries: attempt,
                });
            }
            Err(e) if attempt + 1 >= policy.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    outcome = "exhausted",
                    error = %e,
                );
                return Err(RetryError::Exhausted {
                    error: e,
                    retries: attempt,
                });
            }
            Err(e) => {
                let delay = policy.jittered_delay(attempt);
                attempt += 1;
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    outcome = "retrying",
                    error = %e,
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_delay_never_exceeds_max() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        };
        for attempt in 0..20 {
            assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
            assert!(policy.jittered_delay(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = execute(&fast_policy(3), &cancel, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::Throttled("busy".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(RetryError::Exhausted { retries: 2, .. })));
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = execute(&fast_policy(5), &cancel, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::ContentRejected("policy".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { retries: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_eventual_success_reports_retries() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = execute(&fast_policy(5), &cancel, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Network("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        let (value, retries) = result.unwrap();
        assert_eq!(value, 42);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_before_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = execute(&fast_policy(5), &cancel, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderError>(1) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_sleep() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        };

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let result = execute(&policy, &cancel, "test", || async {
            Err::<(), _>(ProviderError::Throttled("busy".into()))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        // Aborted from inside the sleep, not after a full backoff.
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
