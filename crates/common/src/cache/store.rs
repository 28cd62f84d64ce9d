//! Thread-safe TTL cache for raw response payloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::resilience::{Clock, SystemClock};

/// Entry stored in the cache with its expiry metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

/// Time-boxed memoization of successful responses.
///
/// Entries carry their own TTL and are invalidated lazily on read; mutating
/// operations upstream call [`clear`] instead of tracking which entries a
/// mutation could affect (over-invalidation is the safe direction).
///
/// [`clear`]: Self::clear
pub struct ResponseCache<C: Clock = SystemClock> {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    clock: C,
}

impl ResponseCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResponseCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ResponseCache<C> {
    /// Create a cache with a custom clock (useful for testing expiry).
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            clock,
        }
    }

    /// Look up a fresh entry, removing it if the TTL has elapsed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();

        let expired = {
            let entries = self.read_entries();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if entry.is_expired(now) => true,
                Some(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.data.clone());
                }
            }
        };

        if expired {
            self.write_entries().remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache entry expired");
        }
        None
    }

    /// Store a payload with its own TTL, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, data: Value, ttl: Duration) {
        let entry = CacheEntry { data, stored_at: self.clock.now(), ttl };
        self.write_entries().insert(key.into(), entry);
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write_entries().remove(key).map(|e| e.data)
    }

    /// Drop every entry. Called after mutating operations.
    pub fn clear(&self) {
        self.write_entries().clear();
        debug!("response cache cleared");
    }

    /// Eagerly drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - entries.len();
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
