//! Adaptive job status polling.
//!
//! Drives a job handle to a terminal state by querying its status endpoint
//! in a loop. The cadence adapts to reported progress, poll-level errors
//! back off independently, and the loop is cooperatively cancellable: the
//! token is checked before each poll is scheduled, so an in-flight request
//! may complete but no further polls are issued after cancellation.

use std::time::Duration;

use darkroom_domain::{JobClientError, JobHandle, JobState, JobStatus};
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::executor::{RequestExecutor, RequestOptions};

/// Receives progress and status notifications from a poll loop.
///
/// `on_status` fires on every successful poll, including when the status is
/// unchanged from the previous one; implementations should treat repeated
/// identical notifications as no-ops.
pub trait PollObserver: Send + Sync {
    fn on_progress(&self, _progress: u8) {}
    fn on_status(&self, _status: &JobStatus) {}
}

/// Observer that ignores everything.
impl PollObserver for () {}

/// Tuning for the poll loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Hard ceiling on issued polls before giving up.
    pub max_polls: u32,
    /// Consecutive poll-request errors tolerated before surfacing the last.
    pub max_consecutive_errors: u32,
    /// Base delay after a poll-request error; doubles per consecutive error.
    pub error_backoff: Duration,
    /// Interval while the job is still queued.
    pub pending_interval: Duration,
    /// Interval when progress is above 80.
    pub fast_interval: Duration,
    /// Interval when progress is above 50.
    pub medium_interval: Duration,
    /// Interval otherwise.
    pub default_interval: Duration,
    /// Deadline for a single status request.
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_polls: 180,
            max_consecutive_errors: 3,
            error_backoff: Duration::from_secs(2),
            pending_interval: Duration::from_secs(5),
            fast_interval: Duration::from_secs(1),
            medium_interval: Duration::from_secs(2),
            default_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// Next wait based on the latest status snapshot. A nearly-done job is
    /// polled tightly so completion is observed promptly.
    fn interval_for(&self, status: &JobStatus) -> Duration {
        if status.status == JobState::Pending {
            return self.pending_interval;
        }
        match status.progress_pct() {
            p if p > 80 => self.fast_interval,
            p if p > 50 => self.medium_interval,
            _ => self.default_interval,
        }
    }

    fn error_delay(&self, consecutive_errors: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_errors);
        self.error_backoff.saturating_mul(factor)
    }
}

/// Polls one job at a time; independent loops may run concurrently, each
/// with its own cancellation token.
#[derive(Debug, Clone)]
pub struct JobPoller {
    executor: RequestExecutor,
    config: PollerConfig,
}

impl JobPoller {
    pub fn new(executor: RequestExecutor, config: PollerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll `handle` until the job reaches a terminal state.
    ///
    /// Resolves with the job's result payload on `completed`. Progress and
    /// status observers fire on every successful poll, in that order.
    ///
    /// # Errors
    ///
    /// - [`JobClientError::JobFailed`] when the backend reports `failed`,
    ///   carrying its error message or a generic fallback.
    /// - [`JobClientError::JobCancelled`] when the backend reports
    ///   `cancelled`.
    /// - [`JobClientError::Cancelled`] when `cancel` fires first.
    /// - [`JobClientError::PollingTimeout`] at the poll ceiling.
    /// - The last request error after too many consecutive poll failures.
    #[instrument(skip(self, observer, cancel), fields(job_id = %handle.job_id))]
    pub async fn poll(
        &self,
        handle: &JobHandle,
        observer: &dyn PollObserver,
        cancel: &CancellationToken,
    ) -> Result<Value, JobClientError> {
        let mut polls = 0u32;
        let mut consecutive_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!("poll loop cancelled by caller");
                return Err(JobClientError::Cancelled);
            }
            if polls >= self.config.max_polls {
                warn!(polls, "poll ceiling reached");
                return Err(JobClientError::PollingTimeout { attempts: polls });
            }

            polls += 1;
            // Each poll is a single attempt; this loop owns error backoff.
            let options = RequestOptions::default()
                .with_retries(0)
                .with_timeout(self.config.request_timeout);
            let wait = match self
                .executor
                .execute(Method::GET, &handle.polling_url, None, options)
                .await
                .and_then(decode_status)
            {
                Ok(status) => {
                    consecutive_errors = 0;
                    observer.on_progress(status.progress_pct());
                    observer.on_status(&status);

                    if status.status.is_terminal() {
                        return resolve_terminal(status);
                    }
                    self.config.interval_for(&status)
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(error = %err, consecutive_errors, "poll request failed");
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return Err(err);
                    }
                    self.config.error_delay(consecutive_errors)
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    info!("poll loop cancelled during wait");
                    return Err(JobClientError::Cancelled);
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

fn decode_status(value: Value) -> Result<JobStatus, JobClientError> {
    serde_json::from_value(value)
        .map_err(|e| JobClientError::Network { message: format!("invalid status payload: {e}") })
}

fn resolve_terminal(status: JobStatus) -> Result<Value, JobClientError> {
    match status.status {
        JobState::Completed => {
            debug!("job completed");
            Ok(status.result.unwrap_or(Value::Null))
        }
        JobState::Failed => Err(JobClientError::JobFailed {
            message: status.error.unwrap_or_else(|| "job failed without an error message".into()),
        }),
        JobState::Cancelled => Err(JobClientError::JobCancelled),
        // Callers only reach here with a terminal status.
        other => Err(JobClientError::Network {
            message: format!("non-terminal status '{other}' treated as terminal"),
        }),
    }
}
