//! Per-device rolling statistics.
//!
//! Entries are created on first sighting and only ever removed by an explicit
//! clear, or when the table is full and room is needed for a new device (the
//! stalest entry goes first).

use crate::source::types::EventRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Default upper bound on tracked devices.
pub const DEFAULT_MAX_DEVICES: usize = 10_000;

/// Rolling statistics for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: String,
    /// Most recent non-empty name
    pub display_name: Option<String>,
    /// Every accepted sample since creation or the last clear
    pub sample_count: u64,
    /// Samples accepted while a discovery session was active
    pub session_sample_count: u64,
    pub last_signal: Option<i32>,
    pub min_signal: Option<i32>,
    pub max_signal: Option<i32>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceStats {
    fn new(device_id: String, at: DateTime<Utc>) -> Self {
        Self {
            device_id,
            display_name: None,
            sample_count: 0,
            session_sample_count: 0,
            last_signal: None,
            min_signal: None,
            max_signal: None,
            first_seen: at,
            last_seen: at,
        }
    }

    fn observe(&mut self, event: &EventRecord, in_session: bool) {
        self.sample_count += 1;
        if in_session {
            self.session_sample_count += 1;
        }

        if let Some(name) = &event.display_name {
            self.display_name = Some(name.clone());
        }

        if let Some(dbm) = event.signal_strength {
            self.last_signal = Some(dbm);
            self.min_signal = Some(self.min_signal.map_or(dbm, |m| m.min(dbm)));
            self.max_signal = Some(self.max_signal.map_or(dbm, |m| m.max(dbm)));
        }

        self.last_seen = event.observed_at;
    }

    /// Spread between the strongest and weakest sample, if both are known.
    pub fn signal_spread(&self) -> Option<u32> {
        match (self.min_signal, self.max_signal) {
            (Some(min), Some(max)) => Some(max.abs_diff(min)),
            _ => None,
        }
    }
}

/// What an update did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    Created,
    /// A new entry was created and the named device was evicted to make room
    CreatedWithEviction(String),
}

/// Bounded map from device identifier to [`DeviceStats`].
///
/// A recency index ordered by `(last_seen, device_id)` sits next to the map,
/// so finding the eviction victim is a `pop_first` rather than a scan.
#[derive(Debug, Clone)]
pub struct DeviceTable {
    devices: HashMap<String, DeviceStats>,
    by_recency: BTreeSet<(DateTime<Utc>, String)>,
    max_devices: usize,
}

impl DeviceTable {
    /// Create a table holding at most `max_devices` entries (minimum 1).
    pub fn new(max_devices: usize) -> Self {
        Self {
            devices: HashMap::new(),
            by_recency: BTreeSet::new(),
            max_devices: max_devices.max(1),
        }
    }

    /// Create or update the entry for the event's device.
    pub fn update(&mut self, event: &EventRecord, in_session: bool) -> UpdateOutcome {
        if let Some(stats) = self.devices.get_mut(&event.device_id) {
            let previous = stats.last_seen;
            stats.observe(event, in_session);
            if stats.last_seen != previous {
                self.by_recency
                    .remove(&(previous, event.device_id.clone()));
                self.by_recency
                    .insert((stats.last_seen, event.device_id.clone()));
            }
            return UpdateOutcome::Updated;
        }

        let evicted = if self.devices.len() >= self.max_devices {
            self.evict_stalest()
        } else {
            None
        };

        let mut stats = DeviceStats::new(event.device_id.clone(), event.observed_at);
        stats.observe(event, in_session);
        self.insert(stats);

        match evicted {
            Some(id) => UpdateOutcome::CreatedWithEviction(id),
            None => UpdateOutcome::Created,
        }
    }

    fn insert(&mut self, stats: DeviceStats) {
        self.by_recency
            .insert((stats.last_seen, stats.device_id.clone()));
        self.devices.insert(stats.device_id.clone(), stats);
    }

    /// Remove the entry with the oldest `last_seen` (smallest id on ties).
    fn evict_stalest(&mut self) -> Option<String> {
        let (_, stalest) = self.by_recency.pop_first()?;
        self.devices.remove(&stalest);
        Some(stalest)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceStats> {
        self.devices.get(device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceStats> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Zero every device's session counter (a new session is starting).
    pub fn reset_session_counts(&mut self) {
        for stats in self.devices.values_mut() {
            stats.session_sample_count = 0;
        }
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.by_recency.clear();
    }

    /// Replace the contents with previously saved entries, honouring the bound.
    pub fn restore(&mut self, entries: Vec<DeviceStats>) {
        self.clear();

        // Keep the most recently seen entries if the saved set is too large
        let mut entries = entries;
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        entries.truncate(self.max_devices);

        for stats in entries {
            self.insert(stats);
        }
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEVICES)
    }
}
