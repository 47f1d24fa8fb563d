//! BLE Activity - nearby-device activity aggregation.
//!
//! This library turns a stream of Bluetooth Low Energy advertisements into
//! occurrence statistics (last 60 seconds, last 5 minutes, today), a bounded
//! table of per-device statistics, and a ranked list of the devices most
//! likely to be the one a user is trying to identify.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BLE Activity                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Source    │──▶│ Coordinator │──▶│  Windowing  │       │
//! │  │  (channel)  │   │ (tick, lock)│   │ (60s/5m/day)│       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                      │         │                            │
//! │                      ▼         ▼                            │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Counters   │   │   Devices   │──▶│   Ranking   │       │
//! │  │ (telemetry) │   │  + Session  │   │ (top N)     │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ble_activity::{Advertisement, ChannelSource, Config, Coordinator};
//!
//! let source = ChannelSource::new();
//! let feeder = source.feeder();
//! let coordinator = Coordinator::new(Config::default(), source).expect("valid config");
//!
//! coordinator.start().expect("Failed to start coordinator");
//! feeder
//!     .push(Advertisement::new("AA:01").with_signal(-60))
//!     .expect("source running");
//!
//! let stats = coordinator.tick();
//! println!("{} packets in the last 60s", stats.packets_last_60s);
//! coordinator.stop();
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod source;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_filter_tag, Config, ConfigError};
pub use coordinator::{Coordinator, CoordinatorError, IngestOutcome, SnapshotError, Subscription};
pub use core::{
    CandidateView, DeviceStats, RankScope, SessionSnapshot, SessionState, WindowStats,
    DEFAULT_CANDIDATE_LIMIT,
};
pub use source::{
    Advertisement, AdvertisementSource, ChannelSource, ScanningMode, SourceError, SourceEvent,
    SourceFeeder,
};
pub use telemetry::{CounterStats, IngestCounters, SharedIngestCounters};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
