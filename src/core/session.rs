//! Discovery session state machine.
//!
//! A session is started and stopped explicitly by the user and stops itself
//! once it has been active for longer than its configured duration. The
//! expiry is checked whenever an event or a tick is processed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound for the session duration in seconds.
pub const MIN_SESSION_DURATION_SECS: u64 = 10;

/// Upper bound for the session duration in seconds.
pub const MAX_SESSION_DURATION_SECS: u64 = 3600;

/// Default session duration in seconds.
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 120;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
}

/// A time-bounded discovery session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySession {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_secs")]
    duration: Duration,
}

/// Read-only view of a session handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub session_duration_secs: u64,
    /// When an active session will expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl DiscoverySession {
    /// Create an idle session. The duration is validated by the configuration.
    pub fn new(duration: std::time::Duration) -> Self {
        Self {
            state: SessionState::Idle,
            started_at: None,
            stopped_at: None,
            duration: Duration::seconds(duration.as_secs() as i64),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Start (or restart) the session at `now`. The last caller wins.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state = SessionState::Active;
        self.started_at = Some(now);
        self.stopped_at = None;
    }

    /// Stop the session at `now`. Returns false if it was already idle.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = SessionState::Idle;
        self.stopped_at = Some(now);
        true
    }

    /// Stop the session if it has outlived its duration. Returns true if it
    /// was stopped by this call.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match (self.state, self.started_at) {
            (SessionState::Active, Some(started)) if now - started > self.duration => {
                self.stop(now)
            }
            _ => false,
        }
    }

    /// Return to the initial idle state, keeping the configured duration.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.started_at = None;
        self.stopped_at = None;
    }

    /// Take over the state of a saved session, keeping this session's duration.
    pub fn adopt(&mut self, saved: &DiscoverySession) {
        self.state = saved.state;
        self.started_at = saved.started_at;
        self.stopped_at = saved.stopped_at;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.is_active(),
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            session_duration_secs: self.duration.num_seconds() as u64,
            expires_at: match self.state {
                SessionState::Active => self.started_at.map(|s| s + self.duration),
                SessionState::Idle => None,
            },
        }
    }
}

/// Serde support for chrono durations as whole seconds.
mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}
