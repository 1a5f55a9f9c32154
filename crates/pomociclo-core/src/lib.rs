//! # Pomociclo Core Library
//!
//! Core logic for the Pomociclo study tracker: a Pomodoro cycle that rotates
//! through study subjects, credits studied minutes against weekly goals and
//! reports sessions to a rewards backend. The `pomociclo` CLI is a thin
//! front end over this crate.
//!
//! ## Architecture
//!
//! - **Timer**: a wall-clock-deadline engine persisted across restarts and
//!   driven by a cancellable [`Ticker`]
//! - **Ledgers**: the block history (source of the current [`Phase`]) and
//!   per-subject progress, both kept in a [`KeyValueStore`]
//! - **Cycle**: [`CycleController`] turns user actions into ledger
//!   mutations and deferred backend calls
//! - **API**: [`SessionApi`] and its reqwest implementation
//!
//! ## Key Components
//!
//! - [`BackgroundTimer`]: countdown state machine
//! - [`CycleController`]: toggle/skip/previous/reset orchestration
//! - [`Database`]: SQLite key-value store
//! - [`Config`]: TOML configuration

pub mod api;
pub mod cycle;
pub mod error;
pub mod events;
pub mod history;
pub mod phase;
pub mod progress;
pub mod storage;
pub mod subject;
pub mod timer;

pub use api::{HttpSessionApi, RemoteCall, RemoteStatus, SessionApi};
pub use cycle::{CycleController, CycleSnapshot, CycleState, Notice, NoticeLevel, Outcome};
pub use error::{ApiError, ConfigError, CoreError, CycleError, Result, StorageError};
pub use events::Event;
pub use history::{Block, BlockHistory};
pub use phase::{CycleStats, Phase, PhaseDurations};
pub use progress::ProgressLedger;
pub use storage::{Config, Database, KeyValueStore, MemoryStore};
pub use subject::{Subject, SubjectCatalog, SubjectPatch};
pub use timer::{BackgroundTimer, Clock, RestoreOutcome, SystemClock, Tick, Ticker, TimerState};
