use clap::Subcommand;
use pomociclo_core::{CycleError, SessionApi, Subject, SubjectPatch};
use serde::Serialize;
use tracing::info;

use super::{print_json, CliResult, Context, Report};

#[derive(Subcommand)]
pub enum SubjectAction {
    /// List cached subjects with their progress
    List,
    /// Add a subject to the local list
    Add {
        /// Display name
        name: String,
        /// Weekly goal in minutes (0 = no goal)
        #[arg(long, default_value = "0")]
        goal: u64,
        /// Hex color
        #[arg(long)]
        color: Option<String>,
        /// Explicit id (defaults to a random UUID)
        #[arg(long)]
        id: Option<String>,
    },
    /// Change a subject's name, goal or color
    Edit {
        /// Subject ID
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// Weekly goal in minutes (0 = no goal)
        #[arg(long)]
        goal: Option<u64>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Remove a subject from the local list
    Remove {
        /// Subject ID
        id: String,
    },
    /// Move a subject into another subject's place in the study order
    Move {
        /// Subject to move
        id: String,
        /// Subject whose place it takes
        over: String,
    },
    /// Select the subject to study
    Select {
        /// Subject ID
        id: String,
    },
    /// Zero a subject's progress (defaults to the selected subject)
    Reset {
        /// Subject ID
        id: Option<String>,
        /// Clear the whole block history, restarting the long break count
        #[arg(long)]
        long_break_counter: bool,
    },
    /// Pull subjects and studied minutes from the backend
    Sync,
}

#[derive(Serialize)]
struct SubjectRow<'a> {
    #[serde(flatten)]
    subject: &'a Subject,
    studied_minutes: u64,
    complete: bool,
    current: bool,
}

#[derive(Serialize)]
struct AddedView {
    #[serde(flatten)]
    subject: Subject,
    #[serde(flatten)]
    report: Report,
}

#[derive(Serialize)]
struct SyncSummary {
    subjects: usize,
    totals: usize,
}

pub fn run(action: SubjectAction) -> CliResult {
    let mut ctx = Context::open()?;

    match action {
        SubjectAction::List => {
            let current = ctx.cycle.state().current_subject.as_deref();
            let rows: Vec<SubjectRow> = ctx
                .cycle
                .subjects()
                .iter()
                .map(|s| {
                    let studied = ctx.cycle.progress().get(&s.id);
                    SubjectRow {
                        subject: s,
                        studied_minutes: studied,
                        complete: s.is_complete(studied),
                        current: current == Some(s.id.as_str()),
                    }
                })
                .collect();
            print_json(&rows)
        }
        SubjectAction::Add {
            name,
            goal,
            color,
            id,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut subject = Subject::new(id, name, goal);
            if let Some(color) = color {
                subject.color = color;
            }
            let outcome = ctx.cycle.add_subject(subject.clone())?;
            let mut report = Report::default();
            report.absorb(outcome);
            print_json(&AddedView { subject, report })
        }
        SubjectAction::Edit {
            id,
            name,
            goal,
            color,
        } => {
            let patch = SubjectPatch {
                name,
                color,
                time_goal: goal,
            };
            if patch.is_empty() {
                return Err("nothing to change: pass --name, --goal or --color".into());
            }
            let outcome = ctx.cycle.update_subject(&id, patch)?;
            ctx.finish(outcome)
        }
        SubjectAction::Remove { id } => {
            let outcome = ctx.cycle.remove_subject(&id)?;
            ctx.finish(outcome)
        }
        SubjectAction::Move { id, over } => {
            let outcome = ctx.cycle.move_subject(&id, &over)?;
            ctx.finish(outcome)
        }
        SubjectAction::Select { id } => {
            let outcome = ctx.cycle.select_subject(&id)?;
            ctx.finish(outcome)
        }
        SubjectAction::Reset {
            id,
            long_break_counter,
        } => {
            let id = match id {
                Some(id) => id,
                None => ctx
                    .cycle
                    .state()
                    .current_subject
                    .clone()
                    .ok_or(CycleError::NoSubjectSelected)?,
            };
            let outcome = ctx.cycle.reset_subject(&id, long_break_counter)?;
            ctx.finish(outcome)
        }
        SubjectAction::Sync => {
            let (subjects, totals) = ctx.runtime.block_on(async {
                let subjects = ctx.api.list_subjects().await?;
                let totals = ctx.api.subject_totals().await?;
                Ok::<_, pomociclo_core::ApiError>((subjects, totals))
            })?;
            info!(subjects = subjects.len(), totals = totals.len(), "subjects synced");

            let summary = SyncSummary {
                subjects: subjects.len(),
                totals: totals.len(),
            };
            ctx.cycle.replace_subjects(subjects)?;
            ctx.cycle.merge_backend_progress(&totals);
            ctx.cycle.flush();
            print_json(&summary)
        }
    }
}
