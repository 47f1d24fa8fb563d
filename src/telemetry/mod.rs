//! Telemetry for the BLE activity aggregator.
//!
//! Counts what happened to every advertisement so dropped and filtered input
//! stays visible without ever being an error.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_counters, create_shared_counters_with_persistence, CounterStats, IngestCounters,
    SharedIngestCounters,
};
