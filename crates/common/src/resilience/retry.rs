//! Generic retry execution with configurable backoff.
//!
//! The retry executor drives any fallible async operation, asking a
//! [`RetryPolicy`] whether each failure is worth another attempt and
//! spacing attempts out with a [`BackoffStrategy`]. Non-retryable errors
//! surface unchanged so callers keep their typed failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can terminate a retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All attempts were used up; carries the final error.
    #[error("all {attempts} attempts exhausted")]
    AttemptsExhausted { attempts: u32, source: E },

    /// The policy decided the error is not worth retrying.
    #[error("operation failed with non-retryable error")]
    NonRetryable { source: E },
}

impl<E> RetryError<E> {
    /// Unwrap the underlying operation error regardless of how the
    /// sequence terminated.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::AttemptsExhausted { source, .. } => source,
            RetryError::NonRetryable { source } => source,
        }
    }
}

/// Decision for whether to retry an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with the configured backoff delay.
    Retry,
    /// Retry after a specific delay.
    RetryAfter(Duration),
    /// Surface the error immediately.
    Stop,
}

/// Trait deciding whether an error should be retried.
pub trait RetryPolicy<E> {
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

impl<E, F> RetryPolicy<E> for F
where
    F: Fn(&E, u32) -> RetryDecision,
{
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
        self(error, attempt)
    }
}

/// Backoff strategy for calculating delays between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay between every attempt.
    Fixed(Duration),
    /// `initial_delay * base^attempt`, capped at `max_delay`.
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Delay before the retry following `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let millis = initial_delay.as_millis() as f64 * base.powi(attempt as i32);
                Duration::from_millis(millis.min(max_delay.as_millis() as f64) as u64)
            }
        }
    }
}

/// Retry executor: at most `max_attempts` invocations of the operation.
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    max_attempts: u32,
    backoff: BackoffStrategy,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create an executor making at most `max_attempts` invocations.
    ///
    /// `max_attempts` is clamped to at least 1; the first invocation is
    /// not a "retry".
    pub fn new(max_attempts: u32, backoff: BackoffStrategy, policy: P) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, policy }
    }

    /// Drive `operation` until success, a `Stop` decision, or exhaustion.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            debug!(attempt = attempt + 1, max = self.max_attempts, "executing operation");
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt + 1 >= self.max_attempts {
                        warn!(attempts = attempt + 1, %error, "retry attempts exhausted");
                        return Err(RetryError::AttemptsExhausted {
                            attempts: attempt + 1,
                            source: error,
                        });
                    }
                    let delay = match self.policy.should_retry(&error, attempt) {
                        RetryDecision::Stop => {
                            debug!(%error, "policy stopped retry sequence");
                            return Err(RetryError::NonRetryable { source: error });
                        }
                        RetryDecision::Retry => self.backoff.delay_for(attempt),
                        RetryDecision::RetryAfter(custom) => custom,
                    };
                    warn!(attempt = attempt + 1, ?delay, %error, "operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn always_retry() -> impl Fn(&String, u32) -> RetryDecision {
        |_: &String, _| RetryDecision::Retry
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(100));
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let executor = RetryExecutor::new(
            4,
            BackoffStrategy::Fixed(Duration::from_millis(1)),
            always_retry(),
        );

        let result = executor
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let executor = RetryExecutor::new(
            3,
            BackoffStrategy::Fixed(Duration::from_millis(1)),
            always_retry(),
        );

        let result = executor
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("persistent".to_string())
                }
            })
            .await;

        match result {
            Err(RetryError::AttemptsExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, "persistent");
            }
            other => panic!("expected AttemptsExhausted, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_decision_surfaces_error_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let executor = RetryExecutor::new(
            5,
            BackoffStrategy::Fixed(Duration::from_millis(1)),
            |_: &String, _| RetryDecision::Stop,
        );

        let result = executor
            .execute(|| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("fatal".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_uses_custom_delay() {
        let executor = RetryExecutor::new(
            2,
            BackoffStrategy::Fixed(Duration::from_secs(5)),
            |_: &String, _| RetryDecision::RetryAfter(Duration::from_millis(1)),
        );

        let start = std::time::Instant::now();
        let result = executor.execute(|| async { Err::<(), _>("err".to_string()) }).await;
        assert!(result.is_err());
        // Custom delay overrode the 5s fixed backoff.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn into_inner_recovers_source() {
        let executor = RetryExecutor::new(
            1,
            BackoffStrategy::Fixed(Duration::from_millis(1)),
            always_retry(),
        );
        let result = executor.execute(|| async { Err::<(), _>("oops".to_string()) }).await;
        assert_eq!(result.unwrap_err().into_inner(), "oops");
    }
}
