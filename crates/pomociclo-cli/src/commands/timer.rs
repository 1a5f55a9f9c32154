use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use pomociclo_core::api::{execute, HttpSessionApi};
use pomociclo_core::{CycleController, CycleSnapshot, Outcome, Ticker};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{print_json, CliResult, Context, Report};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start, pause or resume the current block
    Toggle,
    /// Credit the current block as skipped and move on
    Skip,
    /// Undo the last block and rewind the timer to re-run it
    Previous,
    /// Re-arm the current block without touching history
    Reset,
    /// Print current cycle state as JSON
    Status,
    /// Run the timer in the foreground until interrupted
    Run {
        /// Toggle the timer once before entering the loop
        #[arg(long)]
        start: bool,
    },
}

#[derive(Serialize)]
struct StatusView {
    #[serde(flatten)]
    snapshot: CycleSnapshot,
    #[serde(skip_serializing_if = "Report::is_empty")]
    report: Report,
}

pub fn run(action: TimerAction) -> CliResult {
    let mut ctx = Context::open()?;

    match action {
        TimerAction::Toggle => {
            let outcome = ctx.cycle.toggle()?;
            ctx.finish(outcome)
        }
        TimerAction::Skip => {
            let outcome = ctx.cycle.skip_block()?;
            ctx.finish(outcome)
        }
        TimerAction::Previous => {
            let outcome = ctx.cycle.previous_block()?;
            ctx.finish(outcome)
        }
        TimerAction::Reset => {
            let outcome = ctx.cycle.reset_current_block();
            ctx.finish(outcome)
        }
        TimerAction::Status => print_json(&StatusView {
            snapshot: ctx.cycle.snapshot(),
            report: std::mem::take(&mut ctx.carried),
        }),
        TimerAction::Run { start } => run_foreground(ctx, start),
    }
}

/// Tick the cycle until ctrl-c, printing one JSON line per report.
fn run_foreground(ctx: Context, start: bool) -> CliResult {
    let Context {
        config,
        cycle,
        api,
        runtime,
        carried,
    } = ctx;

    runtime.block_on(async move {
        if !carried.is_empty() {
            print_line(&carried)?;
        }

        let cycle = Arc::new(Mutex::new(cycle));
        let period = Duration::from_millis(config.timer.tick_interval_ms);
        let (ticker, mut completions) = Ticker::spawn(cycle.clone(), period);

        if start {
            let outcome = cycle.lock().await.toggle()?;
            dispatch(&cycle, &api, outcome).await?;
        }
        print_line(&cycle.lock().await.snapshot())?;
        info!(tick_ms = period.as_millis() as u64, "foreground timer running");

        loop {
            tokio::select! {
                Some(outcome) = completions.recv() => {
                    dispatch(&cycle, &api, outcome).await?;
                    print_line(&cycle.lock().await.snapshot())?;
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("interrupted");
                    break;
                }
            }
        }

        ticker.cancel();
        let mut guard = cycle.lock().await;
        if config.timer.clear_on_exit {
            guard.teardown();
        } else {
            guard.flush();
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

/// Run the backend call outside the cycle lock, then record its status.
async fn dispatch(
    cycle: &Mutex<CycleController>,
    api: &HttpSessionApi,
    outcome: Outcome,
) -> CliResult {
    let mut report = Report::default();
    if let Some(call) = report.absorb(outcome) {
        let status = execute(api, call).await;
        let notices = cycle.lock().await.record_remote(status.clone());
        report.record(status, notices);
    }
    print_line(&report)
}

fn print_line<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
