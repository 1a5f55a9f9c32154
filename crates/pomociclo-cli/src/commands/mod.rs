pub mod config;
pub mod cycle;
pub mod subject;
pub mod timer;

use std::sync::Arc;

use pomociclo_core::api::{execute, HttpSessionApi, RemoteCall, RemoteStatus};
use pomociclo_core::{
    Config, CycleController, Database, Event, KeyValueStore, Notice, Outcome, SystemClock,
};
use serde::Serialize;
use tokio::runtime::Runtime;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// What a command did, as printed on stdout.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub events: Vec<Event>,
    pub notices: Vec<Notice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<RemoteStatus>,
}

impl Report {
    /// Take the outcome's events and notices, handing back its backend call.
    pub fn absorb(&mut self, outcome: Outcome) -> Option<RemoteCall> {
        self.events.extend(outcome.events);
        self.notices.extend(outcome.notices);
        outcome.remote
    }

    pub fn record(&mut self, status: RemoteStatus, notices: Vec<Notice>) {
        self.remote.push(status);
        self.notices.extend(notices);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.notices.is_empty() && self.remote.is_empty()
    }
}

/// Everything a command needs: config, the cycle over the SQLite store,
/// and the backend client with a runtime to drive it.
pub struct Context {
    pub config: Config,
    pub cycle: CycleController,
    pub api: HttpSessionApi,
    pub runtime: Runtime,
    /// Output of work done while opening (a credited expired block).
    pub carried: Report,
}

impl Context {
    pub fn open() -> CliResult<Self> {
        let config = Config::load()?;
        let store: Arc<dyn KeyValueStore> = Arc::new(Database::open()?);
        let cycle = CycleController::open(store, Arc::new(SystemClock), &config.timer);
        let api = HttpSessionApi::from_config(&config.api)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let mut ctx = Self {
            config,
            cycle,
            api,
            runtime,
            carried: Report::default(),
        };
        if let Some(pending) = ctx.cycle.take_pending() {
            let mut report = Report::default();
            ctx.settle_into(&mut report, pending);
            ctx.carried = report;
        }
        Ok(ctx)
    }

    /// Run the outcome's backend call, if any, and fold the result back.
    fn settle_into(&mut self, report: &mut Report, outcome: Outcome) {
        if let Some(call) = report.absorb(outcome) {
            let status = self.runtime.block_on(execute(&self.api, call));
            let notices = self.cycle.record_remote(status.clone());
            report.record(status, notices);
        }
    }

    /// Settle `outcome` and print it together with anything carried over.
    pub fn finish(mut self, outcome: Outcome) -> CliResult {
        let mut report = std::mem::take(&mut self.carried);
        self.settle_into(&mut report, outcome);
        print_json(&report)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
