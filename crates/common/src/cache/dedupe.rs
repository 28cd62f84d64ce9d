//! In-flight request coalescing.
//!
//! Concurrent callers asking for the same key share one outstanding
//! producer future and all observe its outcome, success or failure. The
//! slot is released once the producer resolves, so a later call for the
//! same key starts a fresh request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::debug;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Slot<T, E> {
    generation: u64,
    future: SharedResult<T, E>,
}

/// Map of in-flight producers keyed by request key.
///
/// Error and value types must be `Clone` because every coalesced caller
/// receives its own copy of the shared outcome.
pub struct InflightMap<T, E> {
    slots: Mutex<HashMap<String, Slot<T, E>>>,
    next_generation: AtomicU64,
}

impl<T, E> Default for InflightMap<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> InflightMap<T, E> {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()), next_generation: AtomicU64::new(0) }
    }

    /// Number of producers currently outstanding.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot<T, E>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T, E> InflightMap<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `producer` for `key`, or piggyback on an identical request that
    /// is already in flight.
    ///
    /// The producer is invoked only when no request for `key` is
    /// outstanding; otherwise the caller awaits the existing shared future
    /// and receives the same resolved or rejected outcome.
    pub async fn dedupe<F, Fut>(&self, key: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (future, generation, coalesced) = {
            let mut slots = self.lock();
            match slots.get(key) {
                Some(slot) => (slot.future.clone(), slot.generation, true),
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = producer().boxed().shared();
                    slots.insert(
                        key.to_string(),
                        Slot { generation, future: shared.clone() },
                    );
                    (shared, generation, false)
                }
            }
        };

        if coalesced {
            debug!(key, "coalescing onto in-flight request");
        }

        let result = future.await;

        // Only the slot this call observed may be released; a newer request
        // for the same key must keep its own slot.
        let mut slots = self.lock();
        if slots.get(key).map(|slot| slot.generation) == Some(generation) {
            slots.remove(key);
        }

        result
    }
}
