//! Client configuration and deployment-environment resolution.

use std::time::Duration;

use darkroom_domain::JobClientError;
use url::Url;

const LOCAL_BASE_URL: &str = "http://127.0.0.1:8787";
const PRODUCTION_BASE_URL: &str = "https://jobs.darkroom.app/api";

/// Deployment environment the client talks to.
///
/// Base URLs never mix across environments: resolution is deterministic
/// from the environment plus an optional explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Local,
    #[default]
    Production,
}

impl Environment {
    fn default_base_url(self) -> &'static str {
        match self {
            Self::Local => LOCAL_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }

    /// Parse an environment name as accepted by `DARKROOM_ENV`.
    pub fn parse(name: &str) -> Result<Self, JobClientError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Self::Local),
            "production" | "prod" => Ok(Self::Production),
            other => Err(JobClientError::Config {
                message: format!("unknown environment '{other}' (expected local or production)"),
            }),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Configuration for a [`JobClient`](crate::JobClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    /// Explicit base URL; wins over the environment default when set.
    pub base_url_override: Option<String>,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Retry budget for retryable failures (attempts = retries + 1).
    pub retries: u32,
    /// Initial delay before the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u64,
    /// How long the circuit stays open before admitting a probe.
    pub cool_down: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            base_url_override: None,
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Build a config from `DARKROOM_ENV`, `DARKROOM_BASE_URL`, and
    /// `DARKROOM_TIMEOUT_SECS`, falling back to defaults for anything
    /// unset.
    ///
    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] if a variable is present but
    /// malformed.
    pub fn from_env() -> Result<Self, JobClientError> {
        let mut config = Self::default();

        if let Ok(env) = std::env::var("DARKROOM_ENV") {
            config.environment = Environment::parse(&env)?;
        }
        if let Ok(url) = std::env::var("DARKROOM_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url_override = Some(url);
            }
        }
        if let Ok(secs) = std::env::var("DARKROOM_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| JobClientError::Config {
                message: format!("DARKROOM_TIMEOUT_SECS must be an integer, got '{secs}'"),
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolved base URL: override first, then the environment default.
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.default_base_url())
    }

    /// Join an endpoint path (or absolute URL) against the base URL.
    ///
    /// Polling URLs returned by the backend may already be absolute; those
    /// pass through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] when the result is not a valid URL.
    pub fn resolve(&self, path: &str) -> Result<String, JobClientError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        let base = self.base_url().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let joined = format!("{base}/{path}");
        Url::parse(&joined)
            .map(|u| u.to_string())
            .map_err(|e| JobClientError::Config { message: format!("invalid URL '{joined}': {e}") })
    }

    /// # Errors
    ///
    /// Returns [`JobClientError::Config`] for zero durations or an
    /// unparseable override URL.
    pub fn validate(&self) -> Result<(), JobClientError> {
        if self.timeout.is_zero() {
            return Err(JobClientError::Config { message: "timeout must be positive".into() });
        }
        if self.cool_down.is_zero() {
            return Err(JobClientError::Config { message: "cool_down must be positive".into() });
        }
        if self.failure_threshold == 0 {
            return Err(JobClientError::Config {
                message: "failure_threshold must be at least 1".into(),
            });
        }
        if let Some(url) = &self.base_url_override {
            Url::parse(url).map_err(|e| JobClientError::Config {
                message: format!("invalid base URL override '{url}': {e}"),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults() {
        let local = ClientConfig { environment: Environment::Local, ..Default::default() };
        assert_eq!(local.base_url(), "http://127.0.0.1:8787");

        let prod = ClientConfig::default();
        assert_eq!(prod.base_url(), "https://jobs.darkroom.app/api");
    }

    #[test]
    fn override_wins_over_environment() {
        let config = ClientConfig {
            environment: Environment::Local,
            base_url_override: Some("https://staging.darkroom.app/api".into()),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://staging.darkroom.app/api");
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let config = ClientConfig {
            base_url_override: Some("https://staging.darkroom.app/api/".into()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve("/jobs/status/abc").unwrap(),
            "https://staging.darkroom.app/api/jobs/status/abc"
        );
    }

    #[test]
    fn resolve_passes_absolute_urls_through() {
        let config = ClientConfig::default();
        assert_eq!(
            config.resolve("https://elsewhere.example/poll/1").unwrap(),
            "https://elsewhere.example/poll/1"
        );
    }

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse("local").unwrap(), Environment::Local);
        assert_eq!(Environment::parse("DEV").unwrap(), Environment::Local);
        assert_eq!(Environment::parse("prod").unwrap(), Environment::Production);
        assert!(Environment::parse("staging").is_err());
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let config = ClientConfig { timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(JobClientError::Config { .. })));
    }

    #[test]
    fn validation_rejects_bad_override() {
        let config =
            ClientConfig { base_url_override: Some("not a url".into()), ..Default::default() };
        assert!(config.validate().is_err());
    }
}
