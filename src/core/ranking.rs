//! Candidate ranking over the device table.
//!
//! Devices seen often, and whose signal strength moved the most, float to the
//! top. Recency only breaks near-ties.

use crate::core::devices::{DeviceStats, DeviceTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default number of candidates returned.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 10;

const SAMPLE_WEIGHT: f64 = 0.7;
const SPREAD_WEIGHT: f64 = 1.2;
const RECENCY_WEIGHT: f64 = 1e-6;

/// Which devices take part in a ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RankScope {
    /// Every device in the table
    #[default]
    All,
    /// Only devices observed during the current (or last) discovery session
    Session,
}

/// A ranked device as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateView {
    pub device_id: String,
    pub display_name: Option<String>,
    pub score: f64,
    pub sample_count: u64,
    pub session_sample_count: u64,
    pub last_signal: Option<i32>,
    pub min_signal: Option<i32>,
    pub max_signal: Option<i32>,
    pub last_seen: DateTime<Utc>,
}

/// Composite activity score for a device.
pub fn score(device: &DeviceStats) -> f64 {
    let spread = device.signal_spread().map_or(0.0, f64::from);
    SAMPLE_WEIGHT * device.sample_count as f64
        + SPREAD_WEIGHT * spread
        + RECENCY_WEIGHT * device.last_seen.timestamp() as f64
}

/// Rank devices and return at most `limit` of them, best first.
pub fn rank(table: &DeviceTable, limit: usize, scope: RankScope) -> Vec<CandidateView> {
    if limit == 0 || table.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &DeviceStats)> = table
        .iter()
        .filter(|d| match scope {
            RankScope::All => true,
            RankScope::Session => d.session_sample_count > 0,
        })
        .map(|d| (score(d), d))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.device_id.cmp(&b.device_id))
    });
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, d)| CandidateView {
            device_id: d.device_id.clone(),
            display_name: d.display_name.clone(),
            score,
            sample_count: d.sample_count,
            session_sample_count: d.session_sample_count,
            last_signal: d.last_signal,
            min_signal: d.min_signal,
            max_signal: d.max_signal,
            last_seen: d.last_seen,
        })
        .collect()
}
