//! Executor behavior against a mock backend: retry accounting, circuit
//! breaking, caching, deduplication, and the 401 refresh policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use darkroom_client::{
    AnonymousSession, ClientConfig, ManagedSession, RequestExecutor, RequestOptions,
    SessionProvider, TokenRefresher,
};
use darkroom_common::resilience::CircuitState;
use darkroom_domain::JobClientError;
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_for(server: &MockServer) -> ClientConfig {
    init_tracing();
    ClientConfig {
        base_url_override: Some(server.uri()),
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

fn executor_for(server: &MockServer) -> RequestExecutor {
    RequestExecutor::new(config_for(server), Arc::new(AnonymousSession)).expect("executor")
}

fn fast_options(retries: u32) -> RequestOptions {
    RequestOptions::default().with_retries(retries).with_retry_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn permanent_failure_makes_exactly_retries_plus_one_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let err = executor
        .execute(Method::GET, "/jobs/user", None, fast_options(2))
        .await
        .unwrap_err();

    assert!(matches!(err, JobClientError::Server { status: 500, .. }));
}

#[tokio::test]
async fn terminal_4xx_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/status/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such job"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let err = executor
        .execute(Method::GET, "/jobs/status/missing", None, fast_options(3))
        .await
        .unwrap_err();

    assert_eq!(err, JobClientError::Client { status: 404, message: "no such job".into() });
}

#[tokio::test]
async fn transient_500s_recover_within_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let value = executor
        .execute(Method::GET, "/health", None, fast_options(3).unauthenticated())
        .await
        .unwrap();

    assert_eq!(value, json!({"ok": true}));
}

#[tokio::test]
async fn rate_limiting_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let value =
        executor.execute(Method::GET, "/jobs/user", None, fast_options(2)).await.unwrap();
    assert_eq!(value, json!([]));
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_fails_fast() {
    let server = MockServer::start().await;
    // Two failing sequences with retries=0 reach the threshold of 2.
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = ClientConfig {
        failure_threshold: 2,
        ..config_for(&server)
    };
    let executor = RequestExecutor::new(config, Arc::new(AnonymousSession)).unwrap();

    for _ in 0..2 {
        let err = executor
            .execute(Method::GET, "/jobs/user", None, fast_options(0))
            .await
            .unwrap_err();
        assert!(matches!(err, JobClientError::Server { .. }));
    }
    assert_eq!(executor.circuit_state(), CircuitState::Open);

    // Fails fast with no outbound attempt; the mock's expect(2) verifies.
    let err = executor
        .execute(Method::GET, "/jobs/user", None, fast_options(0))
        .await
        .unwrap_err();
    assert_eq!(err, JobClientError::CircuitOpen);
}

#[tokio::test]
async fn cacheable_get_is_served_from_cache_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"jobId": "a", "status": "completed"}])))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let options = RequestOptions::cacheable(Duration::from_secs(30));

    let first =
        executor.execute(Method::GET, "/jobs/user", None, options.clone()).await.unwrap();
    let second = executor.execute(Method::GET, "/jobs/user", None, options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(executor.cache().stats().hits, 1);
}

#[tokio::test]
async fn concurrent_identical_requests_coalesce_to_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let options = RequestOptions::cacheable(Duration::from_secs(30));

    let a = executor.execute(Method::GET, "/jobs/user", None, options.clone());
    let b = executor.execute(Method::GET, "/jobs/user", None, options);
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap(), json!([]));
    assert_eq!(b.unwrap(), json!([]));
}

#[tokio::test]
async fn mutating_requests_bypass_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/cancel/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cancelled": true})))
        .expect(2)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    // cacheable is ignored for POST.
    let options = RequestOptions { cacheable: true, ..fast_options(0) };
    for _ in 0..2 {
        executor
            .execute(Method::POST, "/jobs/cancel/abc", None, options.clone())
            .await
            .unwrap();
    }
    assert!(executor.cache().is_empty());
}

#[tokio::test]
async fn timeout_surfaces_as_typed_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let options = fast_options(0).with_timeout(Duration::from_millis(50));
    let err = executor.execute(Method::GET, "/health", None, options).await.unwrap_err();
    assert!(matches!(err, JobClientError::Timeout { .. }));
}

struct StubRefresher {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for StubRefresher {
    async fn refresh_token(&self) -> Result<String, JobClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(JobClientError::Auth { message: "refresh denied".into() })
        } else {
            Ok("fresh".to_string())
        }
    }
}

#[tokio::test]
async fn a_401_triggers_one_refresh_then_retries_with_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = StubRefresher { calls: AtomicU32::new(0), fail: false };
    let session = Arc::new(ManagedSession::with_initial_token(refresher, "stale"));
    let executor = RequestExecutor::new(config_for(&server), session.clone()).unwrap();

    let value =
        executor.execute(Method::GET, "/jobs/user", None, fast_options(3)).await.unwrap();
    assert_eq!(value, json!([]));
    assert_eq!(session.current_token().await.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn failed_refresh_terminates_without_further_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/user"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = StubRefresher { calls: AtomicU32::new(0), fail: true };
    let session = Arc::new(ManagedSession::with_initial_token(refresher, "stale"));
    let executor = RequestExecutor::new(config_for(&server), session).unwrap();

    let err = executor
        .execute(Method::GET, "/jobs/user", None, fast_options(3))
        .await
        .unwrap_err();
    assert!(matches!(err, JobClientError::Auth { .. }));
    assert!(!err.retryable());
}

#[tokio::test]
async fn unauthenticated_option_skips_session_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(darkroom_client::StaticTokenSession::new("secret"));
    let executor = RequestExecutor::new(config_for(&server), session).unwrap();

    executor
        .execute(Method::GET, "/health", None, fast_options(0).unauthenticated())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("Authorization").is_none());
}

#[tokio::test]
async fn empty_success_body_maps_to_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/jobs/abc"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let value =
        executor.execute(Method::DELETE, "/jobs/abc", None, fast_options(0)).await.unwrap();
    assert_eq!(value, serde_json::Value::Null);
}

// SessionProvider stays object-safe; the executor only sees the trait.
#[tokio::test]
async fn executor_accepts_any_session_provider() {
    let server = MockServer::start().await;
    let session: Arc<dyn SessionProvider> = Arc::new(AnonymousSession);
    let executor = RequestExecutor::new(config_for(&server), session).unwrap();
    assert_eq!(executor.circuit_state(), CircuitState::Closed);
}
