//! The coordinator ties ingestion, windows, devices and the discovery session
//! together.
//!
//! All mutation (ingest, tick, clear, session control, restore) happens under
//! one write lock per coordinator; queries take the read lock and so always
//! see a consistent state. Listeners are notified after the lock is released.
//!
//! # Lifecycle
//!
//! ```text
//!  start():  source.start(mode) ──▶ spawn tick worker ──▶ initial recompute
//!  stop():   shutdown + join tick worker ──▶ source.stop()
//! ```
//!
//! The tick worker drains the source's channel and recomputes the windows on
//! a fixed interval. Once `stop()` returns the worker has exited, so no tick
//! can touch the state afterwards.

pub mod listeners;
pub mod snapshot;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError};
use crate::core::{
    rank, CandidateView, DeviceStats, DeviceTable, DiscoverySession, RankScope, SessionSnapshot,
    UpdateOutcome, WindowAggregator, WindowStats,
};
use crate::source::{Advertisement, AdvertisementSource, EventRecord, SourceError, SourceEvent};
use crate::telemetry::{create_shared_counters, SharedIngestCounters};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use listeners::{Listener, ListenerRegistry};
use parking_lot::{Mutex, RwLock};
use snapshot::{PersistedState, SNAPSHOT_VERSION};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

pub use listeners::Subscription;
pub use snapshot::SnapshotError;

/// What happened to an advertisement handed to [`Coordinator::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Rejected by the configured filter tag
    Filtered,
    /// No usable device identifier
    Malformed,
}

/// Errors that can occur while running a coordinator.
#[derive(Debug)]
pub enum CoordinatorError {
    Config(ConfigError),
    Source(SourceError),
    AlreadyRunning,
    WorkerSpawn(String),
    Snapshot(SnapshotError),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::Config(e) => write!(f, "Invalid configuration: {e}"),
            CoordinatorError::Source(e) => write!(f, "Source error: {e}"),
            CoordinatorError::AlreadyRunning => write!(f, "Coordinator is already running"),
            CoordinatorError::WorkerSpawn(e) => write!(f, "Could not spawn tick worker: {e}"),
            CoordinatorError::Snapshot(e) => write!(f, "Snapshot error: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<ConfigError> for CoordinatorError {
    fn from(e: ConfigError) -> Self {
        CoordinatorError::Config(e)
    }
}

impl From<SourceError> for CoordinatorError {
    fn from(e: SourceError) -> Self {
        CoordinatorError::Source(e)
    }
}

impl From<SnapshotError> for CoordinatorError {
    fn from(e: SnapshotError) -> Self {
        CoordinatorError::Snapshot(e)
    }
}

/// Everything the coordinator owns exclusively.
struct CoreState {
    windows: WindowAggregator,
    devices: DeviceTable,
    session: DiscoverySession,
    /// Last assigned observation time; keeps `observed_at` non-decreasing
    last_observed_at: Option<DateTime<Utc>>,
}

/// State shared between the coordinator handle and its tick worker.
struct Shared {
    config: Config,
    clock: Arc<dyn Clock>,
    state: RwLock<CoreState>,
    listeners: Arc<ListenerRegistry>,
    counters: SharedIngestCounters,
    instance_id: Uuid,
}

impl Shared {
    fn ingest(&self, adv: Advertisement) -> IngestOutcome {
        if let Some(tag) = self.config.filter_tag {
            if !adv.carries_tag(tag) {
                self.counters.record_filtered();
                tracing::trace!(device = %adv.device_id, tag, "advertisement filtered");
                return IngestOutcome::Filtered;
            }
        }

        if !adv.is_well_formed() {
            self.counters.record_dropped_malformed();
            tracing::debug!("dropping advertisement without device identifier");
            return IngestOutcome::Malformed;
        }

        {
            let mut state = self.state.write();
            let now = self.clock.now();
            let observed_at = state.last_observed_at.map_or(now, |prev| prev.max(now));
            state.last_observed_at = Some(observed_at);

            // Expire first so an overdue session never gates this event
            if state.session.expire_if_due(observed_at) {
                self.counters.record_session_expired();
                tracing::info!(at = %observed_at, "discovery session expired");
            }
            let in_session = state.session.is_active();

            let record = EventRecord::from_advertisement(adv, observed_at);
            if let UpdateOutcome::CreatedWithEviction(evicted) =
                state.devices.update(&record, in_session)
            {
                self.counters.record_device_evicted();
                tracing::debug!(%evicted, "device table full, evicted stalest entry");
            }
            state.windows.record(&record);
        }

        self.counters.record_accepted();
        self.listeners.notify(&self.counters);
        IngestOutcome::Accepted
    }

    fn recompute(&self) -> WindowStats {
        let mut state = self.state.write();
        let now = self.clock.now();

        if state.session.expire_if_due(now) {
            self.counters.record_session_expired();
            tracing::info!(at = %now, "discovery session expired");
        }
        state.windows.recompute(now).clone()
    }

    fn tick(&self) -> WindowStats {
        let stats = self.recompute();
        self.counters.record_tick();
        tracing::trace!(
            packets_60s = stats.packets_last_60s,
            unique_60s = stats.unique_last_60s,
            "recomputed windows"
        );
        self.listeners.notify(&self.counters);
        stats
    }

    fn handle_source_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::Advertisement(adv) => {
                self.ingest(adv);
            }
            SourceEvent::Fault(reason) => {
                self.counters.record_source_fault();
                tracing::warn!("advertisement source fault, serving last known data: {reason}");
            }
        }
    }
}

struct Worker {
    /// Set by `stop()` before it signals; the worker never runs another
    /// tick or event once it is set
    stopping: Arc<AtomicBool>,
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the aggregation state for one configuration and one source.
pub struct Coordinator {
    shared: Arc<Shared>,
    source: Mutex<Box<dyn AdvertisementSource>>,
    worker: Mutex<Option<Worker>>,
}

impl Coordinator {
    /// Build a coordinator using the system clock.
    ///
    /// Fails if the configuration is invalid; nothing is started.
    pub fn new(
        config: Config,
        source: impl AdvertisementSource + 'static,
    ) -> Result<Self, CoordinatorError> {
        Self::with_clock(config, source, Arc::new(SystemClock))
    }

    /// Build a coordinator that reads time from `clock`.
    pub fn with_clock(
        config: Config,
        source: impl AdvertisementSource + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoordinatorError> {
        Self::with_parts(config, source, clock, create_shared_counters())
    }

    /// Build a coordinator from explicit parts, e.g. counters restored from disk.
    pub fn with_parts(
        config: Config,
        source: impl AdvertisementSource + 'static,
        clock: Arc<dyn Clock>,
        counters: SharedIngestCounters,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;

        let now = clock.now();
        let state = CoreState {
            windows: WindowAggregator::new(now),
            devices: DeviceTable::new(config.max_devices),
            session: DiscoverySession::new(config.session_duration),
            last_observed_at: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                clock,
                state: RwLock::new(state),
                listeners: Arc::new(ListenerRegistry::default()),
                counters,
                instance_id: Uuid::new_v4(),
            }),
            source: Mutex::new(Box::new(source)),
            worker: Mutex::new(None),
        })
    }

    /// Start the source and the periodic tick.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(CoordinatorError::AlreadyRunning);
        }

        let events = {
            let mut source = self.source.lock();
            source.start(self.shared.config.scanning_mode)?;
            source.receiver()
        };

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let stopping = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let interval = self.shared.config.tick_interval;
        let worker_stopping = stopping.clone();
        let spawned = thread::Builder::new()
            .name("ble-activity-tick".to_string())
            .spawn(move || run_worker(shared, events, shutdown_rx, worker_stopping, interval));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.source.lock().stop();
                return Err(CoordinatorError::WorkerSpawn(e.to_string()));
            }
        };
        *worker = Some(Worker {
            stopping,
            shutdown: shutdown_tx,
            handle,
        });
        drop(worker);

        self.shared.recompute();
        tracing::info!(
            instance = %self.shared.instance_id,
            mode = %self.shared.config.scanning_mode,
            tick_secs = interval.as_secs_f64(),
            "coordinator started"
        );
        Ok(())
    }

    /// Stop the tick and then the source. Safe to call repeatedly.
    ///
    /// No tick or source event is processed after this returns, including
    /// when it is called from a listener running on the tick worker.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();

        if let Some(worker) = worker {
            worker.stopping.store(true, Ordering::SeqCst);
            let _ = worker.shutdown.send(());
            // A listener running on the worker itself cannot wait for it
            let on_worker = worker.handle.thread().id() == thread::current().id();
            if !on_worker && worker.handle.join().is_err() {
                tracing::error!("tick worker panicked");
            }
            tracing::info!(instance = %self.shared.instance_id, "coordinator stopped");
        }

        self.source.lock().stop();
    }

    /// Whether the tick worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Whether the source is currently delivering advertisements.
    pub fn is_scanning(&self) -> bool {
        self.source.lock().is_running()
    }

    /// Hand one advertisement to the coordinator.
    ///
    /// Safe to call from any thread, whether or not the coordinator was started.
    /// Every accepted advertisement notifies all listeners synchronously on the
    /// calling thread, so listeners should be cheap on high-rate streams (set a
    /// flag, render on the next tick).
    pub fn ingest(&self, adv: Advertisement) -> IngestOutcome {
        self.shared.ingest(adv)
    }

    /// Recompute the windows now and notify listeners, as the periodic tick does.
    pub fn tick(&self) -> WindowStats {
        self.shared.tick()
    }

    /// Window statistics as of the last recompute.
    pub fn stats(&self) -> WindowStats {
        self.shared.state.read().windows.stats().clone()
    }

    /// Top `limit` devices by activity score.
    pub fn ranked_candidates(&self, limit: usize) -> Vec<CandidateView> {
        rank(&self.shared.state.read().devices, limit, RankScope::All)
    }

    /// Top `limit` devices among those seen during the current or last session.
    pub fn ranked_session_candidates(&self, limit: usize) -> Vec<CandidateView> {
        rank(&self.shared.state.read().devices, limit, RankScope::Session)
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceStats> {
        self.shared.state.read().devices.get(device_id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.shared.state.read().devices.len()
    }

    pub fn session_state(&self) -> SessionSnapshot {
        self.shared.state.read().session.snapshot()
    }

    /// Start (or restart) a discovery session.
    pub fn start_session(&self) -> SessionSnapshot {
        let snapshot = {
            let mut state = self.shared.state.write();
            let now = self.shared.clock.now();
            state.session.start(now);
            state.devices.reset_session_counts();
            state.session.snapshot()
        };
        tracing::info!(
            duration_secs = snapshot.session_duration_secs,
            "discovery session started"
        );
        self.shared.listeners.notify(&self.shared.counters);
        snapshot
    }

    /// Stop the discovery session; a no-op if none is active.
    pub fn stop_session(&self) -> SessionSnapshot {
        let (stopped, snapshot) = {
            let mut state = self.shared.state.write();
            let now = self.shared.clock.now();
            let stopped = state.session.stop(now);
            (stopped, state.session.snapshot())
        };
        if stopped {
            tracing::info!("discovery session stopped");
            self.shared.listeners.notify(&self.shared.counters);
        }
        snapshot
    }

    /// Forget all devices and window contents and return the session to idle.
    pub fn clear(&self) {
        {
            let mut state = self.shared.state.write();
            let now = self.shared.clock.now();
            state.devices.clear();
            state.windows.reset(now);
            state.session.reset();
        }
        tracing::info!("coordinator state cleared");
        self.shared.listeners.notify(&self.shared.counters);
    }

    /// Register a change listener.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener: Arc<Listener> = Arc::new(listener);
        let id = self.shared.listeners.add(listener);
        Subscription::new(id, &self.shared.listeners)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    pub fn counters(&self) -> SharedIngestCounters {
        self.shared.counters.clone()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.shared.instance_id
    }

    /// Serialize the device table and session into an opaque blob.
    pub fn snapshot(&self) -> Result<Vec<u8>, CoordinatorError> {
        let persisted = {
            let state = self.shared.state.read();
            PersistedState {
                version: SNAPSHOT_VERSION,
                instance_id: self.shared.instance_id,
                saved_at: self.shared.clock.now(),
                devices: state.devices.iter().cloned().collect(),
                session: state.session.clone(),
            }
        };
        Ok(persisted.encode()?)
    }

    /// Replace the device table and session with a previously saved blob.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), CoordinatorError> {
        let persisted = PersistedState::decode(bytes)?;
        let device_count = persisted.devices.len();
        {
            let mut state = self.shared.state.write();
            state.devices.restore(persisted.devices);
            state.session.adopt(&persisted.session);
        }
        tracing::info!(
            devices = device_count,
            from = %persisted.instance_id,
            saved_at = %persisted.saved_at,
            "restored snapshot"
        );
        self.shared.listeners.notify(&self.shared.counters);
        Ok(())
    }

    /// Write a snapshot to `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), CoordinatorError> {
        let bytes = self.snapshot()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Io(e.to_string()))?;
        }
        std::fs::write(path, bytes).map_err(|e| SnapshotError::Io(e.to_string()))?;
        Ok(())
    }

    /// Restore from `path` if it exists. Returns whether anything was loaded.
    pub fn load_snapshot(&self, path: &Path) -> Result<bool, CoordinatorError> {
        if !path.exists() {
            return Ok(false);
        }
        let bytes = std::fs::read(path).map_err(|e| SnapshotError::Io(e.to_string()))?;
        self.restore(&bytes)?;
        Ok(true)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tick worker: drains the source and recomputes on a fixed interval until
/// shut down.
fn run_worker(
    shared: Arc<Shared>,
    events: Receiver<SourceEvent>,
    shutdown: Receiver<()>,
    stopping: Arc<AtomicBool>,
    interval: Duration,
) {
    let ticker = tick(interval);
    let idle = never::<SourceEvent>();
    let mut connected = true;

    // A listener may call stop() from inside tick() or ingest(); the flag is
    // rechecked before each unit of work so nothing runs after that returns
    while !stopping.load(Ordering::SeqCst) {
        let source = if connected { &events } else { &idle };
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                shared.tick();
            }
            recv(source) -> event => match event {
                Ok(event) => {
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    shared.handle_source_event(event);
                }
                Err(_) => {
                    shared.counters.record_source_fault();
                    tracing::warn!("advertisement source disconnected, serving last known data");
                    connected = false;
                }
            },
        }
    }
}
