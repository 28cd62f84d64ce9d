//! Domain model for the Darkroom job service.
//!
//! Pure data: job lifecycle states, wire types exchanged with the backend,
//! request payloads for the supported job kinds, and the error taxonomy the
//! client surfaces. No I/O lives here.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod errors;
pub mod types;

pub use errors::JobClientError;
pub use types::{
    CartoonizeRequest, JobHandle, JobRequest, JobStartResponse, JobState, JobStatus, JobSummary,
    StoryboardRequest,
};
