//! Cancellable periodic recomputation.
//!
//! A [`Ticker`] owns a tokio task that locks its target every period,
//! calls [`Tick::tick`], and forwards whatever it yields on an unbounded
//! channel. Dropping or cancelling the ticker aborts the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use super::engine::{BackgroundTimer, TimerCompleted};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that recomputes itself on a fixed period.
pub trait Tick: Send + 'static {
    type Output: Send + 'static;

    fn tick(&mut self) -> Option<Self::Output>;
}

impl Tick for BackgroundTimer {
    type Output = TimerCompleted;

    fn tick(&mut self) -> Option<TimerCompleted> {
        BackgroundTimer::tick(self)
    }
}

pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn the periodic task on the current tokio runtime.
    pub fn spawn<T: Tick>(
        target: Arc<Mutex<T>>,
        period: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<T::Output>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let period = if period.is_zero() {
            DEFAULT_TICK_INTERVAL
        } else {
            period
        };

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let output = {
                    let mut guard = target.lock().await;
                    guard.tick()
                };
                if let Some(output) = output {
                    if tx.send(output).is_err() {
                        debug!("tick receiver dropped; stopping ticker");
                        break;
                    }
                }
            }
        });

        (Self { handle }, rx)
    }

    pub fn cancel(self) {
        // Drop aborts the task.
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
