//! Circuit breaker that short-circuits calls to a failing dependency.
//!
//! Tracks consecutive failures and, once a threshold is crossed, rejects
//! calls outright for a cool-down period instead of letting every caller
//! hammer a backend that is already struggling. After the cool-down, a
//! single probe call is allowed through; its outcome decides whether the
//! circuit closes again or the cool-down restarts.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, the operation was never invoked.
    #[error("circuit breaker is open, rejecting calls")]
    Open,

    /// The protected operation failed.
    #[error("operation failed")]
    Inner {
        #[source]
        source: E,
    },
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through normally.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One probe request is in flight to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u64,
    /// How long the circuit stays open before allowing a probe.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cool_down: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.cool_down.is_zero() {
            return Err(ConfigError::Invalid {
                message: "cool_down must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.config.cool_down = cool_down;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of breaker counters for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub last_failure_time: Option<Instant>,
}

/// Circuit breaker with a single-probe half-open policy.
///
/// Clones share state, so one breaker instance can gate every request a
/// client issues regardless of how many tasks hold a handle to it.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU64>,
    success_count: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    probe_in_flight: Arc<AtomicBool>,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            success_count: Arc::clone(&self.success_count),
            total_calls: Arc::clone(&self.total_calls),
            probe_in_flight: Arc::clone(&self.probe_in_flight),
            last_failure_time: Arc::clone(&self.last_failure_time),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Circuit breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::from_parts(CircuitBreakerConfig::default(), SystemClock)
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            last_failure_time: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        }
    }

    /// Check whether a call may proceed, transitioning open to half-open
    /// once the cool-down has elapsed.
    ///
    /// In half-open state exactly one caller wins the probe slot; everyone
    /// else is rejected until the probe resolves via [`record_success`] or
    /// [`record_failure`].
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    pub fn can_execute(&self) -> bool {
        let state = self.state();
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure()
                    .map(|at| self.clock.now().duration_since(at) >= self.config.cool_down)
                    .unwrap_or(true);
                if !cooled_down {
                    return false;
                }
                // First caller past the cool-down claims the probe slot.
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.set_state(CircuitState::HalfOpen);
                    debug!("circuit breaker half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => false,
        }
    }

    /// Execute an operation under circuit breaker protection.
    ///
    /// Rejected calls fail with [`CircuitError::Open`] without invoking the
    /// operation and are not counted as new failures.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            debug!(state = %self.state(), "circuit breaker rejecting call");
            return Err(CircuitError::Open);
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(source) => {
                self.record_failure();
                Err(CircuitError::Inner { source })
            }
        }
    }

    /// Record a successful call: closes the circuit from half-open and
    /// resets the consecutive-failure count.
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        let state = self.state();
        match state {
            CircuitState::HalfOpen => {
                self.set_state(CircuitState::Closed);
                self.failure_count.store(0, Ordering::Release);
                self.probe_in_flight.store(false, Ordering::Release);
                info!("circuit breaker closed after successful probe");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::Open => {
                // A late success from a call that started before the circuit
                // opened; leave the state machine alone.
            }
        }
    }

    /// Record a failed call, opening the circuit at the threshold or
    /// immediately on a failed half-open probe.
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();
        if let Ok(mut last) = self.last_failure_time.write() {
            *last = Some(now);
        }

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.set_state(CircuitState::Open);
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.set_state(CircuitState::Open);
                self.probe_in_flight.store(false, Ordering::Release);
                warn!("circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    /// Snapshot of the breaker counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            last_failure_time: self.last_failure(),
        }
    }

    /// Force the breaker back to closed and clear all counters.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        if let Ok(mut last) = self.last_failure_time.write() {
            *last = None;
        }
        self.set_state(CircuitState::Closed);
        info!("circuit breaker manually reset");
    }

    fn last_failure(&self) -> Option<Instant> {
        self.last_failure_time.read().ok().and_then(|guard| *guard)
    }

    fn set_state(&self, next: CircuitState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
