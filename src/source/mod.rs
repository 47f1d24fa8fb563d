//! Advertisement sources for the BLE activity aggregator.
//!
//! A source owns the delivery side of advertisement ingestion. The
//! coordinator starts it with the configured scanning mode, drains its event
//! channel on the tick worker, and stops it on teardown.

pub mod channel;
pub mod types;

use crossbeam_channel::Receiver;

// Re-export commonly used types
pub use channel::{ChannelSource, SourceFeeder};
pub use types::{Advertisement, EventRecord, ScanningMode, SourceEvent};

/// Something that produces advertisements for the coordinator.
pub trait AdvertisementSource: Send {
    /// Begin delivering advertisements using the given scanning mode.
    fn start(&mut self, mode: ScanningMode) -> Result<(), SourceError>;

    /// Stop delivering advertisements. Must be safe to call when stopped.
    fn stop(&mut self);

    /// Check if the source is currently delivering.
    fn is_running(&self) -> bool;

    /// Channel on which the source publishes events.
    fn receiver(&self) -> Receiver<SourceEvent>;
}

/// Errors that can occur while running a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    AlreadyRunning,
    NotRunning,
    /// The event channel is full; the advertisement was not delivered
    Backpressure,
    Disconnected,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::AlreadyRunning => write!(f, "Source is already running"),
            SourceError::NotRunning => write!(f, "Source is not running"),
            SourceError::Backpressure => write!(f, "Source channel is full"),
            SourceError::Disconnected => write!(f, "Source channel is disconnected"),
        }
    }
}

impl std::error::Error for SourceError {}
