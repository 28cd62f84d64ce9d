//! Session credential providers.
//!
//! The executor only depends on the [`SessionProvider`] contract: hand over
//! the current auth headers, refresh on demand, report whether a session
//! exists. Concrete providers cover the three observed deployments:
//! anonymous (local dev), a fixed token (tests, service accounts), and a
//! managed session that renews its bearer token through a refresher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use darkroom_domain::JobClientError;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Supplies bearer credentials for authenticated requests.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Headers to attach to an authenticated request.
    ///
    /// May be empty when no session exists; the request then goes out
    /// unauthenticated and the backend decides.
    async fn auth_headers(&self) -> HashMap<String, String>;

    /// Attempt to renew the session credential.
    ///
    /// # Errors
    ///
    /// Returns [`JobClientError::Auth`] when the session cannot be renewed;
    /// the caller treats the original 401 as terminal.
    async fn refresh(&self) -> Result<(), JobClientError>;

    async fn is_authenticated(&self) -> bool;
}

/// No credentials at all. Refresh always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousSession;

#[async_trait]
impl SessionProvider for AnonymousSession {
    async fn auth_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn refresh(&self) -> Result<(), JobClientError> {
        Err(JobClientError::Auth { message: "no session to refresh".into() })
    }

    async fn is_authenticated(&self) -> bool {
        false
    }
}

/// A fixed bearer token that never refreshes.
#[derive(Debug, Clone)]
pub struct StaticTokenSession {
    token: String,
}

impl StaticTokenSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl SessionProvider for StaticTokenSession {
    async fn auth_headers(&self) -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), format!("Bearer {}", self.token))])
    }

    async fn refresh(&self) -> Result<(), JobClientError> {
        Err(JobClientError::Auth { message: "static token cannot be refreshed".into() })
    }

    async fn is_authenticated(&self) -> bool {
        true
    }
}

/// Exchanges the current credential for a fresh one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`JobClientError::Auth`] when the backend refuses to issue a
    /// new token.
    async fn refresh_token(&self) -> Result<String, JobClientError>;
}

/// Session backed by a refresher, holding the current token in memory.
///
/// Refresh is safe to call from multiple in-flight requests; concurrent
/// refreshes serialize on the token lock and the policy is at most one
/// refresh attempt per 401 observed per request, so a harmless
/// double-refresh may occur under contention.
pub struct ManagedSession<R: TokenRefresher> {
    token: Arc<RwLock<Option<String>>>,
    refresher: Arc<R>,
}

impl<R: TokenRefresher> ManagedSession<R> {
    pub fn new(refresher: R) -> Self {
        Self { token: Arc::new(RwLock::new(None)), refresher: Arc::new(refresher) }
    }

    /// Start with a known-good token instead of refreshing on first use.
    pub fn with_initial_token(refresher: R, token: impl Into<String>) -> Self {
        Self { token: Arc::new(RwLock::new(Some(token.into()))), refresher: Arc::new(refresher) }
    }

    pub async fn current_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}

#[async_trait]
impl<R: TokenRefresher> SessionProvider for ManagedSession<R> {
    async fn auth_headers(&self) -> HashMap<String, String> {
        match self.token.read().await.as_deref() {
            Some(token) => {
                HashMap::from([("Authorization".to_string(), format!("Bearer {token}"))])
            }
            None => HashMap::new(),
        }
    }

    async fn refresh(&self) -> Result<(), JobClientError> {
        debug!("refreshing session token");
        match self.refresher.refresh_token().await {
            Ok(new_token) => {
                *self.token.write().await = Some(new_token);
                info!("session token refreshed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "session refresh failed");
                *self.token.write().await = None;
                Err(err)
            }
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}
