//! Change listeners.
//!
//! Consumers register a callback and get a [`Subscription`] back. Callbacks
//! run outside the coordinator's state lock, so they may read `stats()` or
//! `ranked_candidates()` freely. A listener that fails or panics is logged
//! and counted; the remaining listeners still run.

use crate::telemetry::IngestCounters;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked whenever the coordinator's state changed.
pub type Listener = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Arc<Listener>)>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<Listener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every listener once. Returns the number of failures.
    pub(crate) fn notify(&self, counters: &IngestCounters) -> usize {
        // Snapshot the list so callbacks can (un)subscribe without deadlocking
        let listeners: Vec<(u64, Arc<Listener>)> = self.entries.lock().clone();

        let mut failures = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    counters.record_listener_failure();
                    tracing::warn!(listener = id, "listener failed: {e:#}");
                }
                Err(_) => {
                    failures += 1;
                    counters.record_listener_failure();
                    tracing::error!(listener = id, "listener panicked");
                }
            }
        }
        failures
    }
}

/// Handle returned by `add_listener`. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Remove the listener. Returns false if it was already removed or the
    /// coordinator is gone.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
