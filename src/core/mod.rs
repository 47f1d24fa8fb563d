//! Core aggregation for the BLE activity aggregator.
//!
//! This module contains:
//! - Sliding-window and per-day occurrence statistics
//! - The bounded per-device statistics table
//! - The discovery session state machine
//! - Candidate ranking over the device table

pub mod devices;
pub mod ranking;
pub mod session;
pub mod windowing;

// Re-export commonly used types
pub use devices::{DeviceStats, DeviceTable, UpdateOutcome, DEFAULT_MAX_DEVICES};
pub use ranking::{rank, score, CandidateView, RankScope, DEFAULT_CANDIDATE_LIMIT};
pub use session::{
    DiscoverySession, SessionSnapshot, SessionState, DEFAULT_SESSION_DURATION_SECS,
    MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS,
};
pub use windowing::{LastObservation, SlidingWindow, WindowAggregator, WindowStats};
