mod clock;
mod engine;
mod store;
mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BackgroundTimer, RestoreOutcome, TimerCompleted, TimerState};
pub use store::{PersistedTimer, TimerStore};
pub use ticker::{Tick, Ticker, DEFAULT_TICK_INTERVAL};
