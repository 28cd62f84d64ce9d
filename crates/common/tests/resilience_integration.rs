//! Integration tests for resilience primitives.
//!
//! Exercises circuit breaker state transitions under concurrent load and
//! retry executor behavior across combined failure scenarios.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use darkroom_common::resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitState, MockClock, RetryDecision,
    RetryError, RetryExecutor,
};

fn test_breaker(threshold: u64, cool_down_secs: u64) -> (CircuitBreaker<MockClock>, MockClock) {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .cool_down(Duration::from_secs(cool_down_secs))
        .build()
        .expect("valid config");
    let breaker = CircuitBreaker::with_clock(config, clock.clone()).expect("breaker");
    (breaker, clock)
}

/// After the threshold is crossed, every pending caller is rejected without
/// the protected operation being invoked, and after the cool-down exactly
/// one concurrent caller wins the probe slot.
#[tokio::test(flavor = "multi_thread")]
async fn single_probe_across_concurrent_callers() {
    let (breaker, clock) = test_breaker(2, 60);
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(61));

    let breaker = Arc::new(breaker);
    let admitted = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let breaker = Arc::clone(&breaker);
        let admitted = Arc::clone(&admitted);
        handles.push(tokio::spawn(async move {
            if breaker.can_execute() {
                admitted.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1, "exactly one probe admitted");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

/// Full recovery cycle: open, cool down, probe succeeds, circuit closes and
/// traffic flows again.
#[tokio::test]
async fn breaker_recovery_cycle() {
    let (breaker, clock) = test_breaker(3, 30);

    for _ in 0..3 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());

    clock.advance(Duration::from_secs(31));
    assert!(breaker.can_execute());
    breaker.record_success();

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
    assert_eq!(breaker.metrics().failure_count, 0);
}

/// A retry executor wrapped around a breaker-gated operation: the breaker
/// accumulates one failure per surfaced (exhausted) sequence, not one per
/// attempt.
#[tokio::test]
async fn retry_exhaustion_feeds_breaker_once() {
    let (breaker, _clock) = test_breaker(2, 60);
    let attempts = Arc::new(AtomicU32::new(0));

    let executor = RetryExecutor::new(
        3,
        BackoffStrategy::Fixed(Duration::from_millis(1)),
        |_: &String, _| RetryDecision::Retry,
    );

    let attempts_clone = Arc::clone(&attempts);
    let result = executor
        .execute(|| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("backend down".to_string())
            }
        })
        .await;

    assert!(matches!(result, Err(RetryError::AttemptsExhausted { attempts: 3, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed, "one sequence is below threshold");
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Exponential backoff spaces attempts with doubling delays.
#[tokio::test]
async fn exponential_backoff_timing() {
    let executor = RetryExecutor::new(
        3,
        BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(20),
            base: 2.0,
            max_delay: Duration::from_secs(1),
        },
        |_: &String, _| RetryDecision::Retry,
    );

    let start = std::time::Instant::now();
    let result = executor.execute(|| async { Err::<(), _>("always".to_string()) }).await;
    let elapsed = start.elapsed();

    assert!(result.is_err());
    // Two sleeps: 20ms + 40ms.
    assert!(elapsed >= Duration::from_millis(60), "elapsed {elapsed:?}");
}
