//! Background timer engine.
//!
//! The engine is a wall-clock-deadline state machine. Remaining time is
//! always recomputed as `ceil((deadline - now) / 1000)`; nothing is
//! decremented, so a suspended process or a late tick cannot drift the
//! countdown. It does not own a thread: the caller (usually a [`Ticker`])
//! invokes `tick()` periodically.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> Paused -> Running -> ... -> Idle (completed)
//! ```
//!
//! Every transition writes the countdown tuple to the [`TimerStore`].
//! [`BackgroundTimer::teardown`] marks a running tuple as closed, which is
//! how a later restore tells a front end that shut down apart from one
//! that simply stopped ticking.
//!
//! [`Ticker`]: super::Ticker

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::clock::Clock;
use super::store::{PersistedTimer, TimerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

/// What the engine found in the store when it was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Fresh,
    Resumed { time_left_secs: u64 },
    Paused { time_left_secs: u64 },
    /// The front end shut down mid-countdown and the deadline has since
    /// passed. No completion fires.
    ExpiredWhileClosed { ended_at_ms: u64, duration_secs: u64 },
    /// The deadline passed while nothing was ticking, but nothing shut the
    /// countdown down either (a one-shot command started it, or the
    /// process died). The owner treats this as a natural completion.
    ExpiredUnattended { ended_at_ms: u64, duration_secs: u64 },
}

/// Delivered once per countdown that reaches zero while running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerCompleted {
    pub duration_secs: u64,
    pub at: DateTime<Utc>,
}

pub struct BackgroundTimer {
    store: TimerStore,
    clock: Arc<dyn Clock>,
    time_left: u64,
    is_running: bool,
    is_paused: bool,
    /// Seconds armed at the last start/resume.
    duration: u64,
    start_time: Option<u64>,
    deadline: Option<u64>,
    completion: Option<mpsc::UnboundedSender<TimerCompleted>>,
}

impl BackgroundTimer {
    /// Create an engine and rehydrate it from `store`.
    pub fn restore(store: TimerStore, clock: Arc<dyn Clock>) -> (Self, RestoreOutcome) {
        let mut timer = Self {
            store,
            clock,
            time_left: 0,
            is_running: false,
            is_paused: false,
            duration: 0,
            start_time: None,
            deadline: None,
            completion: None,
        };

        let Some(saved) = timer.store.load() else {
            return (timer, RestoreOutcome::Fresh);
        };

        let outcome = match (saved.is_running, saved.end_time) {
            (true, Some(end_time)) => {
                let remaining = remaining_secs(end_time, timer.clock.now_ms());
                match saved.closed_at {
                    None if remaining > 0 => {
                        timer.time_left = remaining;
                        timer.is_running = true;
                        timer.duration = saved.duration;
                        timer.start_time = saved.start_time;
                        timer.deadline = Some(end_time);
                        RestoreOutcome::Resumed {
                            time_left_secs: remaining,
                        }
                    }
                    None => {
                        debug!(ended_at_ms = end_time, "countdown ran out while nothing was ticking");
                        timer.store.clear();
                        RestoreOutcome::ExpiredUnattended {
                            ended_at_ms: end_time,
                            duration_secs: saved.duration,
                        }
                    }
                    Some(closed_at) if remaining == 0 => {
                        warn!(
                            ended_at_ms = end_time,
                            closed_at_ms = closed_at,
                            duration_secs = saved.duration,
                            "countdown expired after the front end shut down"
                        );
                        timer.store.clear();
                        RestoreOutcome::ExpiredWhileClosed {
                            ended_at_ms: end_time,
                            duration_secs: saved.duration,
                        }
                    }
                    Some(closed_at) => {
                        debug!(closed_at_ms = closed_at, "discarding countdown closed before its deadline");
                        timer.store.clear();
                        RestoreOutcome::Fresh
                    }
                }
            }
            _ if saved.is_paused => {
                let left = saved.time_left.unwrap_or(0);
                timer.time_left = left;
                timer.is_paused = true;
                timer.duration = saved.duration;
                RestoreOutcome::Paused {
                    time_left_secs: left,
                }
            }
            _ => {
                timer.store.clear();
                RestoreOutcome::Fresh
            }
        };

        debug!(?outcome, "timer restored");
        (timer, outcome)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        if self.is_running {
            TimerState::Running
        } else if self.is_paused {
            TimerState::Paused
        } else {
            TimerState::Idle
        }
    }

    pub fn time_left(&self) -> u64 {
        self.time_left
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a countdown of `seconds`. Zero is ignored.
    pub fn start(&mut self, seconds: u64) -> bool {
        if seconds == 0 {
            debug!("ignoring start with a zero duration");
            return false;
        }
        let now = self.clock.now_ms();
        let persisted = PersistedTimer::running(now, seconds);
        // Persist before flipping state so a concurrent tick sees the deadline.
        self.store.save(&persisted);

        self.start_time = Some(now);
        self.duration = seconds;
        self.deadline = persisted.end_time;
        self.time_left = seconds;
        self.is_running = true;
        self.is_paused = false;
        true
    }

    /// Freeze the countdown. Returns false when nothing was running or the
    /// deadline has already passed (the next tick completes it instead).
    pub fn pause(&mut self) -> bool {
        if !self.is_running {
            return false;
        }
        let Some(deadline) = self.deadline else {
            return false;
        };
        let remaining = remaining_secs(deadline, self.clock.now_ms());
        if remaining == 0 {
            return false;
        }

        self.time_left = remaining;
        self.is_running = false;
        self.is_paused = true;
        self.deadline = None;
        self.start_time = None;
        self.store
            .save(&PersistedTimer::paused(self.time_left, self.duration));
        true
    }

    /// Continue a paused countdown from its frozen remainder.
    pub fn resume(&mut self) -> bool {
        if !self.is_paused || self.time_left == 0 {
            return false;
        }
        let now = self.clock.now_ms();
        let persisted = PersistedTimer::running(now, self.time_left);
        self.store.save(&persisted);

        self.start_time = Some(now);
        self.duration = self.time_left;
        self.deadline = persisted.end_time;
        self.is_running = true;
        self.is_paused = false;
        true
    }

    /// Stop any countdown and arm `seconds` without starting.
    pub fn reset(&mut self, seconds: u64) {
        self.is_running = false;
        self.is_paused = false;
        self.time_left = seconds;
        self.duration = seconds;
        self.start_time = None;
        self.deadline = None;
        self.store.clear();
    }

    /// Register the completion channel. The last registration wins.
    pub fn on_complete(&mut self) -> mpsc::UnboundedReceiver<TimerCompleted> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.completion = Some(tx);
        rx
    }

    /// Recompute the remaining time. Returns the completion when the
    /// countdown reaches zero.
    pub fn tick(&mut self) -> Option<TimerCompleted> {
        if !self.is_running {
            return None;
        }
        let deadline = self.deadline?;
        self.time_left = remaining_secs(deadline, self.clock.now_ms());
        if self.time_left > 0 {
            return None;
        }

        self.is_running = false;
        self.is_paused = false;
        self.deadline = None;
        self.start_time = None;
        self.store.clear();

        let done = TimerCompleted {
            duration_secs: self.duration,
            at: Utc::now(),
        };
        if let Some(tx) = &self.completion {
            if tx.send(done.clone()).is_err() {
                debug!("completion receiver dropped");
                self.completion = None;
            }
        }
        Some(done)
    }

    /// The front end is shutting down.
    ///
    /// A running countdown is marked closed rather than removed so a later
    /// restore can report it; anything else is forgotten.
    pub fn teardown(&mut self) {
        match (self.is_running, self.start_time) {
            (true, Some(start)) => {
                let closed = PersistedTimer::running(start, self.duration).closed(self.clock.now_ms());
                self.store.save(&closed);
            }
            _ => self.store.clear(),
        }
    }
}

fn remaining_secs(deadline_ms: u64, now_ms: u64) -> u64 {
    deadline_ms.saturating_sub(now_ms).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::timer::ManualClock;

    const T0: u64 = 1_700_000_000_000;

    fn engine() -> (Arc<MemoryStore>, Arc<ManualClock>, BackgroundTimer) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let (timer, outcome) = BackgroundTimer::restore(TimerStore::new(kv.clone()), clock.clone());
        assert_eq!(outcome, RestoreOutcome::Fresh);
        (kv, clock, timer)
    }

    fn reopen(kv: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> (BackgroundTimer, RestoreOutcome) {
        BackgroundTimer::restore(TimerStore::new(kv.clone()), clock.clone())
    }

    #[test]
    fn start_pause_resume() {
        let (_, clock, mut t) = engine();
        assert_eq!(t.state(), TimerState::Idle);

        assert!(t.start(1500));
        assert_eq!(t.state(), TimerState::Running);
        assert_eq!(t.deadline_ms(), Some(T0 + 1_500_000));

        clock.advance_secs(100);
        assert!(t.pause());
        assert_eq!(t.state(), TimerState::Paused);
        assert_eq!(t.time_left(), 1400);
        assert!(t.deadline_ms().is_none());

        clock.advance_secs(1000);
        assert_eq!(t.time_left(), 1400);

        assert!(t.resume());
        assert_eq!(t.deadline_ms(), Some(T0 + 1_100_000 + 1_400_000));
    }

    #[test]
    fn zero_start_is_noop() {
        let (kv, _, mut t) = engine();
        assert!(!t.start(0));
        assert_eq!(t.state(), TimerState::Idle);
        assert!(kv.is_empty());
    }

    #[test]
    fn resume_requires_paused_with_time_left() {
        let (_, _, mut t) = engine();
        assert!(!t.resume());
        t.reset(0);
        assert!(!t.resume());
    }

    #[test]
    fn remaining_time_rounds_up_from_the_deadline() {
        let (_, clock, mut t) = engine();
        t.start(10);
        clock.advance_ms(100);
        assert!(t.tick().is_none());
        assert_eq!(t.time_left(), 10);
        clock.advance_ms(8_950);
        t.tick();
        assert_eq!(t.time_left(), 1);
    }

    #[test]
    fn late_tick_does_not_drift() {
        let (_, clock, mut t) = engine();
        t.start(60);
        // A single tick after a long suspension lands on the wall clock.
        clock.advance_secs(45);
        t.tick();
        assert_eq!(t.time_left(), 15);
    }

    #[test]
    fn completion_fires_once_through_the_channel() {
        let (kv, clock, mut t) = engine();
        let mut rx = t.on_complete();
        t.start(5);
        clock.advance_secs(5);

        let done = t.tick().unwrap();
        assert_eq!(done.duration_secs, 5);
        assert_eq!(rx.try_recv().unwrap(), done);
        assert_eq!(t.state(), TimerState::Idle);
        assert_eq!(t.time_left(), 0);
        assert!(kv.is_empty());

        clock.advance_secs(5);
        assert!(t.tick().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn last_registration_wins() {
        let (_, clock, mut t) = engine();
        let mut first = t.on_complete();
        let mut second = t.on_complete();
        t.start(1);
        clock.advance_secs(2);
        t.tick();
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn pause_after_deadline_defers_to_tick() {
        let (_, clock, mut t) = engine();
        t.start(3);
        clock.advance_secs(4);
        assert!(!t.pause());
        assert!(t.tick().is_some());
    }

    #[test]
    fn reset_arms_without_starting() {
        let (kv, _, mut t) = engine();
        t.start(100);
        t.reset(600);
        assert_eq!(t.state(), TimerState::Idle);
        assert_eq!(t.time_left(), 600);
        assert!(kv.is_empty());
    }

    #[test]
    fn restore_running_countdown() {
        let (kv, clock, mut t) = engine();
        t.start(1500);
        clock.advance_secs(600);

        let (restored, outcome) = reopen(&kv, &clock);
        assert_eq!(outcome, RestoreOutcome::Resumed { time_left_secs: 900 });
        assert!(restored.is_running());
        assert_eq!(restored.time_left(), 900);
    }

    #[test]
    fn restore_closed_and_expired_countdown_reports_without_completing() {
        let (kv, clock, mut t) = engine();
        t.start(1500);
        clock.advance_secs(10);
        t.teardown();
        clock.advance_secs(1600);

        let (mut restored, outcome) = reopen(&kv, &clock);
        assert_eq!(
            outcome,
            RestoreOutcome::ExpiredWhileClosed {
                ended_at_ms: T0 + 1_500_000,
                duration_secs: 1500
            }
        );
        assert_eq!(restored.time_left(), 0);
        assert!(!restored.is_running());
        assert!(restored.tick().is_none());
        assert!(kv.is_empty());
    }

    #[test]
    fn restore_unattended_expiry_is_distinguished() {
        let (kv, clock, mut t) = engine();
        t.start(1500);
        drop(t);
        clock.advance_secs(1501);

        let (mut restored, outcome) = reopen(&kv, &clock);
        assert_eq!(
            outcome,
            RestoreOutcome::ExpiredUnattended {
                ended_at_ms: T0 + 1_500_000,
                duration_secs: 1500
            }
        );
        assert!(restored.tick().is_none());
        assert!(kv.is_empty());
    }

    #[test]
    fn restore_paused_countdown() {
        let (kv, clock, mut t) = engine();
        t.start(300);
        clock.advance_secs(20);
        t.pause();
        clock.advance_secs(10_000);

        let (restored, outcome) = reopen(&kv, &clock);
        assert_eq!(outcome, RestoreOutcome::Paused { time_left_secs: 280 });
        assert!(restored.is_paused());
    }

    #[test]
    fn teardown_forgets_running_state() {
        let (kv, clock, mut t) = engine();
        t.start(300);
        t.teardown();
        let (_, outcome) = reopen(&kv, &clock);
        assert_eq!(outcome, RestoreOutcome::Fresh);
        assert!(kv.is_empty());
    }

    #[test]
    fn teardown_of_paused_countdown_clears_it() {
        let (kv, clock, mut t) = engine();
        t.start(300);
        clock.advance_secs(5);
        t.pause();
        t.teardown();
        assert!(kv.is_empty());
    }
}
