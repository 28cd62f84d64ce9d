//! Time-boxed response caching and in-flight request deduplication.
//!
//! [`ResponseCache`] memoizes successful responses for a per-entry TTL and
//! invalidates lazily on read; [`InflightMap`] coalesces concurrent
//! requests for the same key onto a single outstanding future.

mod dedupe;
mod store;

pub use dedupe::InflightMap;
pub use store::{CacheStats, ResponseCache};
