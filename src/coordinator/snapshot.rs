//! Opaque state snapshots.
//!
//! The host may save the blob returned by `Coordinator::snapshot` and hand it
//! back to `Coordinator::restore` later. Only the device table and the
//! discovery session are carried; the sliding windows rebuild themselves from
//! live traffic.

use crate::core::{DeviceStats, DiscoverySession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current snapshot layout.
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedState {
    pub version: u32,
    /// Coordinator instance that produced the snapshot
    pub instance_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub devices: Vec<DeviceStats>,
    pub session: DiscoverySession,
}

impl PersistedState {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let state: PersistedState =
            serde_json::from_slice(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        if state.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(state.version));
        }
        Ok(state)
    }
}

/// Errors that can occur while saving or restoring a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    Encode(String),
    Decode(String),
    UnsupportedVersion(u32),
    Io(String),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Encode(e) => write!(f, "Could not encode snapshot: {e}"),
            SnapshotError::Decode(e) => write!(f, "Could not decode snapshot: {e}"),
            SnapshotError::UnsupportedVersion(v) => write!(f, "Unsupported snapshot version {v}"),
            SnapshotError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}
