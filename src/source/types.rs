//! Advertisement types for the BLE activity aggregator.
//!
//! Sources hand the core an [`Advertisement`]; the core stamps it with its own
//! clock and turns it into an [`EventRecord`] once it has passed the filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded advertisement as delivered by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Stable identifier of the emitting device (usually its address).
    /// An empty identifier makes the advertisement unusable.
    #[serde(default)]
    pub device_id: String,
    /// Human-readable name, if the payload carried one
    #[serde(default)]
    pub display_name: Option<String>,
    /// Signal strength sample in dBm
    #[serde(default)]
    pub signal_strength: Option<i32>,
    /// Manufacturer-data keys present in the payload
    #[serde(default)]
    pub filter_tags: Vec<u16>,
}

impl Advertisement {
    /// Create an advertisement for a device with no optional fields set.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_signal(mut self, dbm: i32) -> Self {
        self.signal_strength = Some(dbm);
        self
    }

    pub fn with_tag(mut self, tag: u16) -> Self {
        self.filter_tags.push(tag);
        self
    }

    /// Whether the advertisement carries the given manufacturer key.
    pub fn carries_tag(&self, tag: u16) -> bool {
        self.filter_tags.contains(&tag)
    }

    /// Whether the advertisement has a usable device identifier.
    pub fn is_well_formed(&self) -> bool {
        !self.device_id.trim().is_empty()
    }
}

/// A normalized observation that has passed ingestion filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub device_id: String,
    pub display_name: Option<String>,
    pub signal_strength: Option<i32>,
    /// Assigned by the coordinator at ingestion time, never by the source
    pub observed_at: DateTime<Utc>,
    pub filter_tags: Vec<u16>,
}

impl EventRecord {
    /// Normalize an advertisement observed at `observed_at`.
    ///
    /// Blank names are treated as absent and the identifier is trimmed.
    pub fn from_advertisement(adv: Advertisement, observed_at: DateTime<Utc>) -> Self {
        let display_name = adv
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Self {
            device_id: adv.device_id.trim().to_string(),
            display_name,
            signal_strength: adv.signal_strength,
            observed_at,
            filter_tags: adv.filter_tags,
        }
    }
}

/// Scanning aggressiveness requested from the source.
///
/// The aggregator itself never looks at this; it is forwarded to the source
/// when the coordinator starts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanningMode {
    #[default]
    Active,
    Passive,
}

impl std::str::FromStr for ScanningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(ScanningMode::Active),
            "passive" => Ok(ScanningMode::Passive),
            other => Err(format!("unknown scanning mode: {other}")),
        }
    }
}

impl std::fmt::Display for ScanningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanningMode::Active => write!(f, "active"),
            ScanningMode::Passive => write!(f, "passive"),
        }
    }
}

/// A message delivered by a source on its event channel.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Advertisement(Advertisement),
    /// An asynchronous failure reported by the source. The coordinator logs
    /// it and keeps serving the data it already has.
    Fault(String),
}
