use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Every state change of the study cycle produces an Event.
/// The CLI prints them; integrations can subscribe to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    BlockStarted {
        phase: Phase,
        subject_id: Option<String>,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    BlockPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    BlockResumed {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    BlockCompleted {
        phase: Phase,
        subject_id: Option<String>,
        duration_min: u32,
        at: DateTime<Utc>,
    },
    BlockSkipped {
        phase: Phase,
        subject_id: Option<String>,
        duration_min: u32,
        at: DateTime<Utc>,
    },
    /// The last block was popped and its credit reversed.
    BlockRewound {
        phase: Phase,
        subject_id: Option<String>,
        duration_min: u32,
        at: DateTime<Utc>,
    },
    /// The engine was re-armed (not started) for the next block.
    PhaseArmed {
        phase: Phase,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    SubjectSelected {
        subject_id: String,
        at: DateTime<Utc>,
    },
    SubjectUpdated {
        subject_id: String,
        at: DateTime<Utc>,
    },
    SubjectRemoved {
        subject_id: String,
        at: DateTime<Utc>,
    },
    /// A subject moved in the study order; `position` is zero-based.
    SubjectMoved {
        subject_id: String,
        position: usize,
        at: DateTime<Utc>,
    },
    SubjectAdvanced {
        from: String,
        to: String,
        at: DateTime<Utc>,
    },
    SubjectReset {
        subject_id: String,
        cleared_history: bool,
        at: DateTime<Utc>,
    },
    CycleReset {
        at: DateTime<Utc>,
    },
}
