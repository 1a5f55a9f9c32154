//! Phase sequencing.
//!
//! The current phase is never stored: it is derived from the tail of the
//! block ledger and the number of study blocks in it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::history::Block;

/// Long-break cadence used when the configured one is unusable.
pub const DEFAULT_LONG_BREAK_INTERVAL: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Study,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn is_break(self) -> bool {
        !matches!(self, Phase::Study)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Study => "Study",
            Phase::ShortBreak => "Short Break",
            Phase::LongBreak => "Long Break",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Study => "study",
            Phase::ShortBreak => "short_break",
            Phase::LongBreak => "long_break",
        })
    }
}

/// Nominal block lengths and the long-break cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub study_min: u32,
    pub short_break_min: u32,
    pub long_break_min: u32,
    pub long_break_interval: u32,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            study_min: 50,
            short_break_min: 10,
            long_break_min: 30,
            long_break_interval: DEFAULT_LONG_BREAK_INTERVAL,
        }
    }
}

impl PhaseDurations {
    /// Zero or negative cadences fall back to [`DEFAULT_LONG_BREAK_INTERVAL`].
    pub fn sanitize_interval(raw: i64) -> u32 {
        if raw <= 0 {
            DEFAULT_LONG_BREAK_INTERVAL
        } else {
            u32::try_from(raw).unwrap_or(u32::MAX)
        }
    }

    /// Minutes the timer runs for `phase`.
    pub fn timer_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Study => self.study_min,
            Phase::ShortBreak => self.short_break_min,
            Phase::LongBreak => self.long_break_min,
        }
    }

    /// Minutes credited to the subject progress bar for `phase`.
    ///
    /// Long breaks credit only the short-break amount.
    pub fn progress_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Study => self.study_min,
            Phase::ShortBreak | Phase::LongBreak => self.short_break_min,
        }
    }

    pub fn timer_seconds(&self, phase: Phase) -> u64 {
        u64::from(self.timer_minutes(phase)) * 60
    }
}

/// Derive the phase that follows the ledger's tail.
pub fn current_phase(blocks: &[Block], long_break_interval: u32) -> Phase {
    let interval = if long_break_interval == 0 {
        DEFAULT_LONG_BREAK_INTERVAL
    } else {
        long_break_interval
    };

    match blocks.last() {
        None => Phase::Study,
        Some(last) if last.kind == Phase::Study => {
            let study_count = study_block_count(blocks);
            if study_count % interval as usize == 0 {
                Phase::LongBreak
            } else {
                Phase::ShortBreak
            }
        }
        Some(_) => Phase::Study,
    }
}

pub fn study_block_count(blocks: &[Block]) -> usize {
    blocks.iter().filter(|b| b.kind == Phase::Study).count()
}

/// Aggregate figures over the current cycle's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub total_blocks: usize,
    pub study_blocks: usize,
    pub skipped_blocks: usize,
    pub studied_minutes: u64,
    pub break_minutes: u64,
    /// Study blocks left before the next long break.
    pub next_long_break_in: u32,
    pub next_phase: Phase,
}

impl CycleStats {
    pub fn from_blocks(blocks: &[Block], durations: &PhaseDurations) -> Self {
        let interval = durations.long_break_interval.max(1);
        let study_blocks = study_block_count(blocks);
        let (studied_minutes, break_minutes) =
            blocks.iter().fold((0u64, 0u64), |(study, rest), b| {
                if b.kind == Phase::Study {
                    (study + u64::from(b.duration), rest)
                } else {
                    (study, rest + u64::from(b.duration))
                }
            });

        Self {
            total_blocks: blocks.len(),
            study_blocks,
            skipped_blocks: blocks.iter().filter(|b| b.skipped).count(),
            studied_minutes,
            break_minutes,
            next_long_break_in: interval - (study_blocks % interval as usize) as u32,
            next_phase: current_phase(blocks, interval),
        }
    }
}
