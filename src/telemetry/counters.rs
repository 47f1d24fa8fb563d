//! Ingestion counters.
//!
//! Tracks what the coordinator did with the advertisements it was handed:
//! how many were accepted, filtered out or dropped as malformed, plus a few
//! lifecycle counters. Counters are lock-free and can be read at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observability counters for one coordinator.
#[derive(Debug)]
pub struct IngestCounters {
    /// Advertisements that reached the windows and device table
    accepted: AtomicU64,
    /// Advertisements rejected by the filter tag
    filtered: AtomicU64,
    /// Advertisements without a usable device identifier
    dropped_malformed: AtomicU64,
    /// Devices evicted because the table was full
    devices_evicted: AtomicU64,
    /// Periodic recomputes performed
    ticks: AtomicU64,
    /// Listener callbacks that failed or panicked
    listener_failures: AtomicU64,
    /// Faults reported by the source
    source_faults: AtomicU64,
    /// Sessions stopped by expiry rather than by the user
    sessions_expired: AtomicU64,
    /// When counting started
    started_at: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
}

impl IngestCounters {
    /// Create a new set of counters.
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            devices_evicted: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            source_faults: AtomicU64::new(0),
            sessions_expired: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that continue from (and save to) a file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut counters = Self::new();
        counters.persist_path = Some(path);

        if let Err(e) = counters.load() {
            tracing::warn!("Could not load previous ingest counters: {e}");
        }

        counters
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_malformed(&self) {
        self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_evicted(&self) {
        self.devices_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_fault(&self) {
        self.source_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_expired(&self) {
        self.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current values.
    pub fn stats(&self) -> CounterStats {
        CounterStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            devices_evicted: self.devices_evicted.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            source_faults: self.source_faults.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Ingest Statistics:\n\
             - Advertisements accepted: {}\n\
             - Filtered by tag: {}\n\
             - Dropped (malformed): {}\n\
             - Devices evicted: {}\n\
             - Recomputes: {}\n\
             - Listener failures: {}\n\
             - Source faults: {}\n\
             - Sessions expired: {}\n\
             - Uptime: {} seconds",
            stats.accepted,
            stats.filtered,
            stats.dropped_malformed,
            stats.devices_evicted,
            stats.ticks,
            stats.listener_failures,
            stats.source_faults,
            stats.sessions_expired,
            stats.uptime_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedCounters {
                accepted: stats.accepted,
                filtered: stats.filtered,
                dropped_malformed: stats.dropped_malformed,
                devices_evicted: stats.devices_evicted,
                ticks: stats.ticks,
                listener_failures: stats.listener_failures,
                source_faults: stats.source_faults,
                sessions_expired: stats.sessions_expired,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedCounters =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.accepted.store(persisted.accepted, Ordering::Relaxed);
                self.filtered.store(persisted.filtered, Ordering::Relaxed);
                self.dropped_malformed
                    .store(persisted.dropped_malformed, Ordering::Relaxed);
                self.devices_evicted
                    .store(persisted.devices_evicted, Ordering::Relaxed);
                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.listener_failures
                    .store(persisted.listener_failures, Ordering::Relaxed);
                self.source_faults
                    .store(persisted.source_faults, Ordering::Relaxed);
                self.sessions_expired
                    .store(persisted.sessions_expired, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.accepted,
            &self.filtered,
            &self.dropped_malformed,
            &self.devices_evicted,
            &self.ticks,
            &self.listener_failures,
            &self.source_faults,
            &self.sessions_expired,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for IngestCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterStats {
    pub accepted: u64,
    pub filtered: u64,
    pub dropped_malformed: u64,
    pub devices_evicted: u64,
    pub ticks: u64,
    pub listener_failures: u64,
    pub source_faults: u64,
    pub sessions_expired: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Counter format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedCounters {
    accepted: u64,
    filtered: u64,
    dropped_malformed: u64,
    devices_evicted: u64,
    ticks: u64,
    listener_failures: u64,
    source_faults: u64,
    sessions_expired: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared counters.
pub type SharedIngestCounters = Arc<IngestCounters>;

/// Create a new shared set of counters.
pub fn create_shared_counters() -> SharedIngestCounters {
    Arc::new(IngestCounters::new())
}

/// Create a new shared set of counters with persistence.
pub fn create_shared_counters_with_persistence(path: PathBuf) -> SharedIngestCounters {
    Arc::new(IngestCounters::with_persistence(path))
}
