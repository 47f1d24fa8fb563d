//! Channel-backed advertisement source.
//!
//! The host's own scanner callback pushes decoded advertisements through a
//! [`SourceFeeder`]; the coordinator drains the other end. Advertisements
//! pushed while the source is stopped are rejected.

use crate::source::types::{Advertisement, ScanningMode, SourceEvent};
use crate::source::{AdvertisementSource, SourceError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// A source fed by the host through a bounded channel.
pub struct ChannelSource {
    sender: Sender<SourceEvent>,
    receiver: Receiver<SourceEvent>,
    running: Arc<AtomicBool>,
    mode: Option<ScanningMode>,
}

impl ChannelSource {
    /// Create a new source with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new source whose channel holds at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        // Bounded so a stalled coordinator cannot grow memory without limit
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            mode: None,
        }
    }

    /// Handle the host uses to push advertisements into this source.
    pub fn feeder(&self) -> SourceFeeder {
        SourceFeeder {
            sender: self.sender.clone(),
            running: self.running.clone(),
        }
    }

    /// Scanning mode requested by the last `start`.
    pub fn scanning_mode(&self) -> Option<ScanningMode> {
        self.mode
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvertisementSource for ChannelSource {
    fn start(&mut self, mode: ScanningMode) -> Result<(), SourceError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SourceError::AlreadyRunning);
        }
        self.mode = Some(mode);
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(%mode, "channel source started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("channel source stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn receiver(&self) -> Receiver<SourceEvent> {
        self.receiver.clone()
    }
}

/// Cloneable push handle for a [`ChannelSource`].
#[derive(Clone)]
pub struct SourceFeeder {
    sender: Sender<SourceEvent>,
    running: Arc<AtomicBool>,
}

impl SourceFeeder {
    /// Push an advertisement without blocking the caller.
    pub fn push(&self, adv: Advertisement) -> Result<(), SourceError> {
        self.send(SourceEvent::Advertisement(adv))
    }

    /// Report an asynchronous failure of the underlying scanner.
    pub fn report_fault(&self, message: impl Into<String>) -> Result<(), SourceError> {
        self.send(SourceEvent::Fault(message.into()))
    }

    /// Check if the source behind this feeder is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, event: SourceEvent) -> Result<(), SourceError> {
        if !self.is_running() {
            return Err(SourceError::NotRunning);
        }
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SourceError::Backpressure,
            TrySendError::Disconnected(_) => SourceError::Disconnected,
        })
    }
}
