//! Wire types exchanged with the job service.
//!
//! Field names follow the backend's camelCase JSON. A status snapshot is
//! replaced wholesale on every poll; nothing here merges partial updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::JobClientError;

/// Lifecycle state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether no further transition can occur from this state.
    ///
    /// Polling stops permanently once a terminal state is observed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Reference to a started job, returned by the start endpoints.
///
/// Immutable once created; the caller owns it until the job reaches a
/// terminal status or is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: String,
    /// Status endpoint for this job, absolute or relative to the base URL.
    pub polling_url: String,
}

/// Raw response body of a successful job-start call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartResponse {
    pub job_id: String,
    pub polling_url: String,
}

impl From<JobStartResponse> for JobHandle {
    fn from(resp: JobStartResponse) -> Self {
        Self { job_id: resp.job_id, polling_url: resp.polling_url }
    }
}

/// Point-in-time snapshot of a job as reported by the polling endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Kind-specific result payload, present on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobStatus {
    /// Progress clamped to the 0..=100 range the backend promises.
    pub fn progress_pct(&self) -> u8 {
        self.progress.min(100)
    }
}

/// A job as listed by the user-jobs endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Payload for a cartoonize job: one source image, one style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartoonizeRequest {
    /// Source image as a URL or data URI.
    pub image: String,
    pub style: String,
}

/// Payload for a storyboard job: a prompt expanded into a panel sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryboardRequest {
    pub prompt: String,
    #[serde(default = "default_panel_count")]
    pub panel_count: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

fn default_panel_count() -> u8 {
    4
}

/// A job-start request, tagged by kind.
///
/// Each kind maps to its own start endpoint and carries a typed body that
/// is validated before anything goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobRequest {
    Cartoonize(CartoonizeRequest),
    Storyboard(StoryboardRequest),
}

impl JobRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cartoonize(_) => "cartoonize",
            Self::Storyboard(_) => "storyboard",
        }
    }

    /// Start endpoint path for this job kind.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Cartoonize(_) => "/jobs/cartoonize",
            Self::Storyboard(_) => "/jobs/storyboard",
        }
    }

    /// Reject payloads the backend would bounce anyway.
    ///
    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] when a required field is empty or
    /// out of range.
    pub fn validate(&self) -> Result<(), JobClientError> {
        match self {
            Self::Cartoonize(req) => {
                if req.image.trim().is_empty() {
                    return Err(JobClientError::Config {
                        message: "cartoonize request requires a source image".into(),
                    });
                }
                if req.style.trim().is_empty() {
                    return Err(JobClientError::Config {
                        message: "cartoonize request requires a style".into(),
                    });
                }
            }
            Self::Storyboard(req) => {
                if req.prompt.trim().is_empty() {
                    return Err(JobClientError::Config {
                        message: "storyboard request requires a prompt".into(),
                    });
                }
                if req.panel_count == 0 || req.panel_count > 12 {
                    return Err(JobClientError::Config {
                        message: format!(
                            "storyboard panel count must be 1..=12, got {}",
                            req.panel_count
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
