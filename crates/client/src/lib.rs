//! Resilient client for the Darkroom job service.
//!
//! Composes the resilience primitives from `darkroom-common` around a
//! reqwest transport: every request runs through circuit-breaker gating,
//! timeout enforcement, retry with exponential backoff, optional response
//! caching with in-flight deduplication, and bearer-token injection with a
//! single refresh attempt on 401.
//!
//! The [`JobClient`] facade is the entry point: start a job, hand the
//! returned [`JobHandle`] to [`JobClient::poll_job`], and observe progress
//! until the job reaches a terminal state.
//!
//! [`JobHandle`]: darkroom_domain::JobHandle

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod executor;
pub mod jobs;
pub mod poller;
pub mod session;

pub use config::{ClientConfig, Environment};
pub use executor::{RequestExecutor, RequestOptions};
pub use jobs::{JobClient, JobClientBuilder};
pub use poller::{JobPoller, PollObserver, PollerConfig};
pub use session::{
    AnonymousSession, ManagedSession, SessionProvider, StaticTokenSession, TokenRefresher,
};
