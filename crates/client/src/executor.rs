//! Resilient request execution.
//!
//! One entry point, [`RequestExecutor::execute`], composes everything a
//! single backend call needs: circuit-breaker gating, per-attempt bearer
//! headers, a hard deadline, retry with exponential backoff, a single
//! session refresh on 401, and optional TTL caching with in-flight
//! deduplication for non-mutating requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use darkroom_common::cache::{InflightMap, ResponseCache};
use darkroom_common::resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryDecision, RetryError,
    RetryExecutor,
};
use darkroom_domain::JobClientError;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::session::SessionProvider;

/// Per-request knobs, defaulted from sensible production values.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Retry budget for retryable failures; total attempts = retries + 1.
    pub retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub retry_delay: Duration,
    /// Memoize a successful response. Only honored for GET.
    pub cacheable: bool,
    pub cache_ttl: Duration,
    /// Hard deadline for a single attempt.
    pub timeout: Duration,
    /// Attach session headers and run the 401 refresh policy.
    pub requires_auth: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            cacheable: false,
            cache_ttl: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            requires_auth: true,
        }
    }
}

impl RequestOptions {
    pub fn cacheable(ttl: Duration) -> Self {
        Self { cacheable: true, cache_ttl: ttl, ..Default::default() }
    }

    pub fn unauthenticated(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Executes HTTP requests against the job service with resilience applied.
///
/// Cheap to clone; clones share the circuit breaker, cache, and in-flight
/// map, so one executor instance per [`ClientConfig`] is the intended
/// lifetime.
#[derive(Clone)]
pub struct RequestExecutor {
    http: reqwest::Client,
    config: ClientConfig,
    session: Arc<dyn SessionProvider>,
    breaker: CircuitBreaker,
    cache: Arc<ResponseCache>,
    inflight: Arc<InflightMap<Value, JobClientError>>,
}

impl RequestExecutor {
    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] when the config fails validation
    /// or the transport cannot be constructed.
    pub fn new(
        config: ClientConfig,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, JobClientError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| JobClientError::Config { message: format!("http client: {e}") })?;

        let breaker_config = CircuitBreakerConfig::builder()
            .failure_threshold(config.failure_threshold)
            .cool_down(config.cool_down)
            .build()
            .map_err(|e| JobClientError::Config { message: e.to_string() })?;
        let breaker = CircuitBreaker::new(breaker_config)
            .map_err(|e| JobClientError::Config { message: e.to_string() })?;

        Ok(Self {
            http,
            config,
            session,
            breaker,
            cache: Arc::new(ResponseCache::new()),
            inflight: Arc::new(InflightMap::new()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Current circuit breaker state, for observability.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Drop all cached responses. Called after mutating operations.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Execute one logical request.
    ///
    /// Cacheable GETs are answered from the cache when fresh, and
    /// concurrent identical requests coalesce onto one network call. A
    /// mutating method bypasses the cache entirely regardless of
    /// `options.cacheable`.
    ///
    /// # Errors
    ///
    /// A typed [`JobClientError`]; retryable failures have already been
    /// retried up to `options.retries` times before surfacing.
    #[instrument(skip(self, body, options), fields(method = %method, path = %path))]
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, JobClientError> {
        let url = self.config.resolve(path)?;

        if options.cacheable && method == Method::GET {
            let key = format!("{method}:{url}");
            if let Some(hit) = self.cache.get(&key) {
                debug!(key, "cache hit");
                return Ok(hit);
            }

            let executor = self.clone();
            let producer_url = url.clone();
            let producer_key = key.clone();
            let producer_options = options.clone();
            return self
                .inflight
                .dedupe(&key, move || async move {
                    let value = executor
                        .dispatch(Method::GET, &producer_url, None, &producer_options)
                        .await?;
                    executor.cache.insert(
                        producer_key,
                        value.clone(),
                        producer_options.cache_ttl,
                    );
                    Ok(value)
                })
                .await;
        }

        self.dispatch(method, &url, body, &options).await
    }

    /// Breaker gate, retry loop, and outcome recording for one request.
    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value, JobClientError> {
        // A rejected call is not a new failure; the breaker already knows.
        if !self.breaker.can_execute() {
            warn!(url, "circuit open, failing fast");
            return Err(JobClientError::CircuitOpen);
        }

        // One refresh per 401 observed by this request. `refresh_ok` hands
        // the outcome from the attempt closure to the retry policy.
        let refresh_attempted = Arc::new(AtomicBool::new(false));
        let refresh_ok = Arc::new(AtomicBool::new(false));

        let policy = {
            let refresh_ok = Arc::clone(&refresh_ok);
            move |error: &JobClientError, _attempt: u32| {
                if matches!(error, JobClientError::Auth { .. }) {
                    if refresh_ok.swap(false, Ordering::SeqCst) {
                        return RetryDecision::Retry;
                    }
                    return RetryDecision::Stop;
                }
                if error.retryable() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::Stop
                }
            }
        };

        let retry = RetryExecutor::new(
            options.retries + 1,
            BackoffStrategy::Exponential {
                initial_delay: options.retry_delay,
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            policy,
        );

        let result = retry
            .execute(|| {
                let executor = self.clone();
                let method = method.clone();
                let url = url.to_string();
                let body = body.clone();
                let options = options.clone();
                let refresh_attempted = Arc::clone(&refresh_attempted);
                let refresh_ok = Arc::clone(&refresh_ok);
                async move {
                    match executor.attempt(method, &url, body, &options).await {
                        Err(JobClientError::Auth { message })
                            if options.requires_auth
                                && !refresh_attempted.swap(true, Ordering::SeqCst) =>
                        {
                            debug!("401 received, attempting session refresh");
                            match executor.session.refresh().await {
                                Ok(()) => refresh_ok.store(true, Ordering::SeqCst),
                                Err(err) => warn!(error = %err, "session refresh failed"),
                            }
                            Err(JobClientError::Auth { message })
                        }
                        other => other,
                    }
                }
            })
            .await;

        match result {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                if let RetryError::AttemptsExhausted { attempts, ref source } = err {
                    debug!(attempts, error = %source, "retries exhausted");
                }
                let source = err.into_inner();
                // Only infrastructure failures count against the breaker; a
                // terminal 4xx means the backend answered and is alive.
                if source.retryable() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                Err(source)
            }
        }
    }

    /// One network attempt: headers, deadline, send, classify.
    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value, JobClientError> {
        let mut request = self.http.request(method, url);
        if options.requires_auth {
            for (name, value) in self.session.auth_headers().await {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| JobClientError::Network { message: e.to_string() })?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| JobClientError::Network { message: e.to_string() })?;
            Ok::<_, JobClientError>((status, text))
        };

        let (status, text) = tokio::time::timeout(options.timeout, send)
            .await
            .map_err(|_| JobClientError::Timeout { seconds: options.timeout.as_secs() })??;

        if (200..300).contains(&status) {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| JobClientError::Network {
                message: format!("invalid response body: {e}"),
            });
        }

        Err(JobClientError::from_status(status, &text))
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.config.base_url())
            .field("circuit_state", &self.breaker.state())
            .finish_non_exhaustive()
    }
}
