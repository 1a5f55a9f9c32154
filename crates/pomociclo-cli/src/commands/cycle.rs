use std::collections::BTreeMap;

use clap::Subcommand;
use pomociclo_core::CycleStats;
use serde::Serialize;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum CycleAction {
    /// Clear the block history and all progress
    Reset,
    /// Show block counts and per-subject progress
    Stats,
}

#[derive(Serialize)]
struct StatsView<'a> {
    #[serde(flatten)]
    stats: CycleStats,
    progress: &'a BTreeMap<String, u64>,
}

pub fn run(action: CycleAction) -> CliResult {
    let mut ctx = Context::open()?;

    match action {
        CycleAction::Reset => {
            let outcome = ctx.cycle.reset_cycle();
            ctx.finish(outcome)
        }
        CycleAction::Stats => print_json(&StatsView {
            stats: ctx.cycle.stats(),
            progress: ctx.cycle.progress().entries(),
        }),
    }
}
