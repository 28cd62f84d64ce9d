//! Resilience patterns for calling an unreliable backend.
//!
//! Provides the circuit breaker that isolates a degraded dependency and the
//! retry executor that handles transient failures with backoff. Both are
//! generic over the error type of the protected operation.

mod circuit_breaker;
mod clock;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitError, CircuitState, ConfigError,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{BackoffStrategy, RetryDecision, RetryError, RetryExecutor, RetryPolicy};
