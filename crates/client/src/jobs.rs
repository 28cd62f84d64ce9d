//! Job facade: the operations callers actually use.
//!
//! Thin composition over the executor and poller. Starting a job does not
//! auto-start polling; the caller owns the poll lifecycle and hands the
//! returned handle to [`JobClient::poll_job`] when ready.

use std::sync::Arc;
use std::time::Duration;

use darkroom_domain::{
    JobClientError, JobHandle, JobRequest, JobStartResponse, JobStatus, JobSummary,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::executor::{RequestExecutor, RequestOptions};
use crate::poller::{JobPoller, PollObserver, PollerConfig};
use crate::session::{AnonymousSession, SessionProvider};

const USER_JOBS_TTL: Duration = Duration::from_secs(30);
const HEALTH_TTL: Duration = Duration::from_secs(60);

/// Client for the Darkroom job service.
///
/// One instance per configuration; clones share the underlying circuit
/// breaker and cache.
#[derive(Debug, Clone)]
pub struct JobClient {
    executor: RequestExecutor,
    poller: JobPoller,
}

impl JobClient {
    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] when the configuration is invalid.
    pub fn new(
        config: ClientConfig,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, JobClientError> {
        Self::builder().config(config).session(session).build()
    }

    pub fn builder() -> JobClientBuilder {
        JobClientBuilder::default()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Start a job and return its handle.
    ///
    /// The payload is validated locally first; nothing goes on the wire for
    /// a malformed request.
    ///
    /// # Errors
    ///
    /// [`JobClientError::Config`] for an invalid payload, otherwise
    /// whatever the executor surfaces.
    #[instrument(skip(self, request), fields(kind = request.kind()))]
    pub async fn start_job(&self, request: &JobRequest) -> Result<JobHandle, JobClientError> {
        request.validate()?;
        let body = serde_json::to_value(request)
            .map_err(|e| JobClientError::Config { message: format!("unserializable payload: {e}") })?;

        let value = self
            .executor
            .execute(Method::POST, request.endpoint(), Some(body), RequestOptions::default())
            .await?;
        let response: JobStartResponse = decode(value)?;
        let handle = JobHandle::from(response);
        info!(job_id = %handle.job_id, "job started");
        Ok(handle)
    }

    /// Fetch one status snapshot without entering a poll loop.
    ///
    /// # Errors
    ///
    /// Whatever the executor surfaces, plus a decode failure for a
    /// malformed snapshot.
    pub async fn job_status(&self, handle: &JobHandle) -> Result<JobStatus, JobClientError> {
        let value = self
            .executor
            .execute(Method::GET, &handle.polling_url, None, RequestOptions::default())
            .await?;
        decode(value)
    }

    /// Poll until terminal and resolve with the job's result payload.
    ///
    /// # Errors
    ///
    /// See [`JobPoller::poll`].
    pub async fn poll_job(
        &self,
        handle: &JobHandle,
        observer: &dyn PollObserver,
        cancel: &CancellationToken,
    ) -> Result<Value, JobClientError> {
        self.poller.poll(handle, observer, cancel).await
    }

    /// Ask the backend to cancel a running job.
    ///
    /// Idempotent on the server: cancelling an already-terminal job yields
    /// a descriptive client failure, not a crash.
    ///
    /// # Errors
    ///
    /// Whatever the executor surfaces.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), JobClientError> {
        self.executor
            .execute(
                Method::POST,
                &format!("/jobs/cancel/{job_id}"),
                None,
                RequestOptions::default(),
            )
            .await?;
        info!(job_id, "job cancel requested");
        Ok(())
    }

    /// Delete a job and drop every cached response.
    ///
    /// Deleting can invalidate any listing; over-invalidation is the safe
    /// direction.
    ///
    /// # Errors
    ///
    /// Whatever the executor surfaces.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: &str) -> Result<(), JobClientError> {
        self.executor
            .execute(Method::DELETE, &format!("/jobs/{job_id}"), None, RequestOptions::default())
            .await?;
        self.executor.clear_cache();
        info!(job_id, "job deleted");
        Ok(())
    }

    /// List the session's jobs. Cached for a short window.
    ///
    /// # Errors
    ///
    /// Whatever the executor surfaces.
    pub async fn get_user_jobs(&self) -> Result<Vec<JobSummary>, JobClientError> {
        let value = self
            .executor
            .execute(Method::GET, "/jobs/user", None, RequestOptions::cacheable(USER_JOBS_TTL))
            .await?;
        decode(value)
    }

    /// Backend liveness probe. Unauthenticated, cached for a minute.
    ///
    /// # Errors
    ///
    /// Whatever the executor surfaces.
    pub async fn health(&self) -> Result<Value, JobClientError> {
        self.executor
            .execute(
                Method::GET,
                "/health",
                None,
                RequestOptions::cacheable(HEALTH_TTL).unauthenticated(),
            )
            .await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, JobClientError> {
    serde_json::from_value(value)
        .map_err(|e| JobClientError::Network { message: format!("invalid response body: {e}") })
}

/// Fluent construction for [`JobClient`].
#[derive(Default)]
pub struct JobClientBuilder {
    config: Option<ClientConfig>,
    session: Option<Arc<dyn SessionProvider>>,
    poller_config: Option<PollerConfig>,
}

impl JobClientBuilder {
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = Some(config);
        self
    }

    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] when the configuration fails
    /// validation.
    pub fn build(self) -> Result<JobClient, JobClientError> {
        let config = self.config.unwrap_or_default();
        let session = self.session.unwrap_or_else(|| Arc::new(AnonymousSession));
        let executor = RequestExecutor::new(config, session)?;
        let poller = JobPoller::new(executor.clone(), self.poller_config.unwrap_or_default());
        Ok(JobClient { executor, poller })
    }
}

#[cfg(test)]
mod tests {
    use darkroom_domain::CartoonizeRequest;

    use super::*;

    #[test]
    fn builder_defaults_to_anonymous_production_client() {
        let client = JobClient::builder().build().unwrap();
        assert_eq!(client.executor().config().base_url(), "https://jobs.darkroom.app/api");
    }

    #[tokio::test]
    async fn start_job_rejects_invalid_payload_before_network() {
        let client = JobClient::builder().build().unwrap();
        let request = JobRequest::Cartoonize(CartoonizeRequest {
            image: String::new(),
            style: "noir".into(),
        });
        // No server exists; an early Config error proves nothing was sent.
        let err = client.start_job(&request).await.unwrap_err();
        assert!(matches!(err, JobClientError::Config { .. }));
    }
}
