//! Durable countdown state.
//!
//! A running countdown is stored as its absolute deadline so it can be
//! recomputed after a restart; a paused one stores the frozen remainder.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{keys, KeyValueStore};

/// The persisted `{isRunning, startTime, duration, endTime}` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimer {
    pub is_running: bool,
    #[serde(default)]
    pub is_paused: bool,
    /// Epoch ms of the last start/resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Seconds armed at the last start/resume.
    #[serde(default)]
    pub duration: u64,
    /// Epoch ms deadline, present only while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Frozen remainder in seconds, present only while paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<u64>,
    /// Epoch ms at which the owning front end shut down mid-countdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<u64>,
}

impl PersistedTimer {
    pub fn running(start_time: u64, duration: u64) -> Self {
        Self {
            is_running: true,
            is_paused: false,
            start_time: Some(start_time),
            duration,
            end_time: Some(start_time.saturating_add(duration.saturating_mul(1000))),
            time_left: None,
            closed_at: None,
        }
    }

    pub fn paused(time_left: u64, duration: u64) -> Self {
        Self {
            is_running: false,
            is_paused: true,
            start_time: None,
            duration,
            end_time: None,
            time_left: Some(time_left),
            closed_at: None,
        }
    }

    /// The same countdown, marked as abandoned at `now_ms`.
    pub fn closed(self, now_ms: u64) -> Self {
        Self {
            closed_at: Some(now_ms),
            ..self
        }
    }
}

pub struct TimerStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TimerStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, keys::TIMER)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Read the persisted tuple; unreadable data counts as absent.
    pub fn load(&self) -> Option<PersistedTimer> {
        match self.store.get(&self.key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "discarding malformed timer state");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "could not read timer state");
                None
            }
        }
    }

    pub fn save(&self, state: &PersistedTimer) {
        let result = serde_json::to_string(state)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(&self.key, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(key = %self.key, error = %e, "failed to persist timer state");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %e, "failed to clear timer state");
        }
    }
}
