//! Generic resilience and caching primitives shared across Darkroom crates.
//!
//! Nothing in this crate knows about jobs or HTTP; it provides the building
//! blocks the client composes: a circuit breaker, a retry executor, a
//! TTL-bounded response cache, and in-flight request deduplication. All
//! time-dependent behavior goes through the [`resilience::Clock`] trait so
//! tests can drive expiry deterministically.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod resilience;

pub use cache::{CacheStats, InflightMap, ResponseCache};
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitError,
    CircuitState, Clock, ConfigError, MockClock, RetryDecision, RetryError, RetryExecutor,
    RetryPolicy, SystemClock,
};
