//! Time-windowed occurrence statistics.
//!
//! Two trailing windows (60 seconds and 5 minutes) are kept as ordered
//! timestamp sequences plus a `device -> last seen` map each; the current UTC
//! day is a hard-reset counter. Ingestion only appends. Eviction and
//! counting happen in [`WindowAggregator::recompute`], which publishes a new
//! [`WindowStats`].

use crate::source::types::EventRecord;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Length of the short trailing window in seconds.
pub const SHORT_WINDOW_SECS: i64 = 60;

/// Length of the medium trailing window in seconds.
pub const MEDIUM_WINDOW_SECS: i64 = 5 * 60;

/// The most recent accepted observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastObservation {
    pub device_id: String,
    pub display_name: Option<String>,
    pub signal_strength: Option<i32>,
    pub observed_at: DateTime<Utc>,
}

/// Window statistics as of the last recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub packets_last_60s: u64,
    pub unique_last_60s: u64,
    pub packets_last_5m: u64,
    pub unique_last_5m: u64,
    pub packets_today: u64,
    pub unique_today: u64,
    /// UTC date the day counters belong to
    pub day: Option<NaiveDate>,
    /// When these values were computed (None before the first recompute)
    pub computed_at: Option<DateTime<Utc>>,
    pub last_seen: Option<LastObservation>,
}

/// A trailing window over the event stream.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    length: Duration,
    /// Observation times, non-decreasing from front to back
    events: VecDeque<DateTime<Utc>>,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            events: VecDeque::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Append an observation.
    pub fn record(&mut self, device_id: &str, at: DateTime<Utc>) {
        self.events.push_back(at);
        match self.last_seen.get_mut(device_id) {
            Some(seen) => *seen = at,
            None => {
                self.last_seen.insert(device_id.to_string(), at);
            }
        }
    }

    /// Drop everything older than `now - length`.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.length;

        // Appends are ordered, so eviction is a prefix trim
        while self.events.front().is_some_and(|&t| t < cutoff) {
            self.events.pop_front();
        }
        self.last_seen.retain(|_, seen| *seen >= cutoff);
    }

    pub fn event_count(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn unique_count(&self) -> u64 {
        self.last_seen.len() as u64
    }
}

/// Counters for the current UTC calendar day.
#[derive(Debug, Clone)]
struct DayWindow {
    day: NaiveDate,
    events: u64,
    devices: HashSet<String>,
}

impl DayWindow {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            events: 0,
            devices: HashSet::new(),
        }
    }

    /// Hard-reset the counters if `day` is not the current marker.
    fn roll_if_needed(&mut self, day: NaiveDate) -> bool {
        if day == self.day {
            return false;
        }
        tracing::debug!(from = %self.day, to = %day, "rolling day window");
        *self = Self::new(day);
        true
    }

    fn record(&mut self, device_id: &str, at: DateTime<Utc>) {
        self.roll_if_needed(at.date_naive());
        self.events += 1;
        if !self.devices.contains(device_id) {
            self.devices.insert(device_id.to_string());
        }
    }
}

/// Maintains the 60 s, 5 min and day windows over the accepted events.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    short: SlidingWindow,
    medium: SlidingWindow,
    day: DayWindow,
    last: Option<LastObservation>,
    stats: WindowStats,
}

impl WindowAggregator {
    /// Create an empty aggregator whose day marker is `now`'s UTC date.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            short: SlidingWindow::new(Duration::seconds(SHORT_WINDOW_SECS)),
            medium: SlidingWindow::new(Duration::seconds(MEDIUM_WINDOW_SECS)),
            day: DayWindow::new(now.date_naive()),
            last: None,
            stats: WindowStats::default(),
        }
    }

    /// Append an accepted event to every window.
    ///
    /// Published statistics do not change until the next recompute.
    pub fn record(&mut self, event: &EventRecord) {
        let at = event.observed_at;
        self.short.record(&event.device_id, at);
        self.medium.record(&event.device_id, at);
        self.day.record(&event.device_id, at);

        self.last = Some(LastObservation {
            device_id: event.device_id.clone(),
            display_name: event.display_name.clone(),
            signal_strength: event.signal_strength,
            observed_at: at,
        });
    }

    /// Evict expired entries, roll the day if needed and publish new stats.
    pub fn recompute(&mut self, now: DateTime<Utc>) -> &WindowStats {
        self.short.evict(now);
        self.medium.evict(now);
        self.day.roll_if_needed(now.date_naive());

        self.stats = WindowStats {
            packets_last_60s: self.short.event_count(),
            unique_last_60s: self.short.unique_count(),
            packets_last_5m: self.medium.event_count(),
            unique_last_5m: self.medium.unique_count(),
            packets_today: self.day.events,
            unique_today: self.day.devices.len() as u64,
            day: Some(self.day.day),
            computed_at: Some(now),
            last_seen: self.last.clone(),
        };
        &self.stats
    }

    /// Statistics as of the last recompute.
    pub fn stats(&self) -> &WindowStats {
        &self.stats
    }

    /// Forget everything and start over on `now`'s day.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }
}
