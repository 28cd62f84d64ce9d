//! Error taxonomy surfaced by the job client.
//!
//! Every failure is typed: callers branch on the variant (and
//! [`JobClientError::retryable`]) rather than matching on message strings.
//! The executor retries retryable variants internally and only surfaces the
//! final failure after exhausting its budget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of the resilient job client.
///
/// `Clone` is required because coalesced in-flight requests hand every
/// waiting caller a copy of the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobClientError {
    /// The backend was unreachable or the connection dropped mid-request.
    #[error("network failure: {message}")]
    Network { message: String },

    /// The backend answered with a 5xx.
    #[error("server failure (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The backend is shedding load (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimit { message: String },

    /// A non-auth 4xx; the request itself is wrong and retrying cannot help.
    #[error("client failure (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// Authentication failed and could not be recovered by a refresh.
    #[error("authentication failure: {message}")]
    Auth { message: String },

    /// The circuit breaker rejected the call without going to the network.
    #[error("service unavailable: circuit breaker is open")]
    CircuitOpen,

    /// A single request exceeded its deadline.
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The job itself reached the `failed` state.
    #[error("job failed: {message}")]
    JobFailed { message: String },

    /// The backend reported the job as cancelled.
    #[error("job was cancelled on the server")]
    JobCancelled,

    /// The caller stopped the poll loop before the job finished.
    #[error("polling was cancelled by the caller")]
    Cancelled,

    /// The poll loop gave up after its attempt ceiling.
    #[error("job did not finish within {attempts} polls")]
    PollingTimeout { attempts: u32 },

    /// Invalid configuration or request payload, caught before the wire.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl JobClientError {
    /// Whether the executor's retry loop may try this failure again.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Server { .. }
                | Self::RateLimit { .. }
                | Self::Timeout { .. }
        )
    }

    /// Stable machine-readable name, identical to the serde `kind` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Server { .. } => "server",
            Self::RateLimit { .. } => "rateLimit",
            Self::Client { .. } => "client",
            Self::Auth { .. } => "auth",
            Self::CircuitOpen => "circuitOpen",
            Self::Timeout { .. } => "timeout",
            Self::JobFailed { .. } => "jobFailed",
            Self::JobCancelled => "jobCancelled",
            Self::Cancelled => "cancelled",
            Self::PollingTimeout { .. } => "pollingTimeout",
            Self::Config { .. } => "config",
        }
    }

    /// HTTP status carried by the failure, when one exists.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::RateLimit { .. } => Some(429),
            Self::Auth { .. } => Some(401),
            _ => None,
        }
    }

    /// Classify a non-2xx HTTP response.
    ///
    /// 401 maps to [`Auth`] so the executor can run its single-refresh
    /// policy; 429 and 5xx are retryable; every other 4xx is terminal and
    /// carries the body verbatim.
    ///
    /// [`Auth`]: Self::Auth
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            body.trim().to_string()
        };
        match status {
            401 => Self::Auth { message },
            429 => Self::RateLimit { message },
            s if (500..600).contains(&s) => Self::Server { status: s, message },
            s => Self::Client { status: s, message },
        }
    }
}
