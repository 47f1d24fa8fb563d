//! Configuration for the BLE activity aggregator.

use crate::core::{
    DEFAULT_MAX_DEVICES, DEFAULT_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS,
    MIN_SESSION_DURATION_SECS,
};
use crate::source::ScanningMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between recomputes.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;

/// Main configuration, consumed when a coordinator is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a discovery session stays active (10-3600 seconds)
    #[serde(with = "duration_serde")]
    pub session_duration: Duration,

    /// Interval of the periodic recompute
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Only accept advertisements carrying this manufacturer key
    pub filter_tag: Option<u16>,

    /// Scanning aggressiveness forwarded to the source
    pub scanning_mode: ScanningMode,

    /// Upper bound on tracked devices
    pub max_devices: usize,

    /// Path for storing snapshots and counters
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ble-activity");

        Self {
            session_duration: Duration::from_secs(DEFAULT_SESSION_DURATION_SECS),
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            filter_tag: None,
            scanning_mode: ScanningMode::default(),
            max_devices: DEFAULT_MAX_DEVICES,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Check the values a coordinator depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secs = self.session_duration.as_secs();
        if self.session_duration.subsec_nanos() != 0
            || !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&secs)
        {
            return Err(ConfigError::InvalidSessionDuration(
                self.session_duration.as_secs_f64(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidTickInterval);
        }
        if self.max_devices == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if
    /// it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ble-activity")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_path.join("snapshot.json")
    }

    pub fn counters_path(&self) -> PathBuf {
        self.data_path.join("counters.json")
    }
}

/// Parse a manufacturer key given as decimal or `0x`-prefixed hex.
pub fn parse_filter_tag(s: &str) -> Result<u16, ConfigError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| ConfigError::ParseError(format!("invalid filter tag {s:?}: {e}")))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    /// Session duration outside 10-3600 whole seconds (value in seconds)
    InvalidSessionDuration(f64),
    InvalidTickInterval,
    InvalidCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidSessionDuration(secs) => write!(
                f,
                "Session duration must be {MIN_SESSION_DURATION_SECS}-{MAX_SESSION_DURATION_SECS} whole seconds, got {secs}"
            ),
            ConfigError::InvalidTickInterval => write!(f, "Tick interval must be non-zero"),
            ConfigError::InvalidCapacity => write!(f, "Device table capacity must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
