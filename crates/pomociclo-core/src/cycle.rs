//! Study cycle orchestration.
//!
//! [`CycleController`] composes the timer engine, the block ledger, the
//! progress ledger and the subject cache into the user-facing actions
//! (toggle, skip, previous, reset). Every action commits its local
//! mutation first and reports what happened as an [`Outcome`]; a backend
//! write, if any, is carried in [`Outcome::remote`] for the caller to run
//! once it no longer holds the controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{RemoteCall, RemoteStatus};
use crate::error::{CycleError, StorageError};
use crate::events::Event;
use crate::history::{Block, BlockHistory};
use crate::phase::{CycleStats, Phase, PhaseDurations};
use crate::progress::ProgressLedger;
use crate::storage::{keys, KeyValueStore, TimerConfig};
use crate::subject::{Subject, SubjectCatalog, SubjectPatch};
use crate::timer::{BackgroundTimer, Clock, RestoreOutcome, Tick, TimerState, TimerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the user. Notices never carry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Result of one cycle operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub events: Vec<Event>,
    pub notices: Vec<Notice>,
    /// Backend write to run after the local commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteCall>,
}

impl Outcome {
    fn notice(notice: Notice) -> Self {
        Self {
            notices: vec![notice],
            ..Self::default()
        }
    }
}

/// Selection and session bookkeeping that outlives a single process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleState {
    #[serde(default)]
    pub current_subject: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set when automatic subject advancement gave up and the user must pick.
    #[serde(default)]
    pub manual_selection: bool,
}

/// Read-only view for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSnapshot {
    pub phase: Phase,
    pub timer: TimerState,
    pub time_left_secs: u64,
    pub subject: Option<Subject>,
    pub subject_minutes: Option<u64>,
    pub subject_complete: bool,
    pub session_id: Option<String>,
    pub manual_selection: bool,
    pub blocks: usize,
    pub next_long_break_in: u32,
    pub restored: RestoreOutcome,
}

pub struct CycleController {
    timer: BackgroundTimer,
    history: BlockHistory,
    progress: ProgressLedger,
    subjects: SubjectCatalog,
    state: CycleState,
    durations: PhaseDurations,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    restored: RestoreOutcome,
    pending: Option<Outcome>,
}

impl CycleController {
    /// Rehydrate every component from `store`.
    ///
    /// A countdown that ran out with nothing ticking and nothing tearing it
    /// down is completed now. One whose front end shut down first is
    /// reported in the snapshot and left uncredited unless
    /// `config.credit_expired_on_restore` is set. Either completion is held
    /// for [`Self::take_pending`]. With no valid selection the first
    /// subject is selected.
    pub fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &TimerConfig) -> Self {
        let (timer, restored) = BackgroundTimer::restore(TimerStore::new(store.clone()), clock.clone());
        let debounce = std::time::Duration::from_millis(config.progress_debounce_ms);

        let mut cycle = Self {
            timer,
            history: BlockHistory::load(store.clone()),
            progress: ProgressLedger::load(store.clone(), debounce),
            subjects: SubjectCatalog::load(store.clone()),
            state: load_state(store.as_ref()),
            durations: config.durations(),
            store,
            clock,
            restored,
            pending: None,
        };

        cycle.fallback_selection();
        match restored {
            RestoreOutcome::Fresh => cycle.arm_current(),
            RestoreOutcome::ExpiredUnattended { .. } => {
                info!("crediting block that ran out while nothing was ticking");
                cycle.pending = Some(cycle.complete_block());
            }
            RestoreOutcome::ExpiredWhileClosed { .. } if config.credit_expired_on_restore => {
                info!("crediting block that expired while closed");
                cycle.pending = Some(cycle.complete_block());
            }
            RestoreOutcome::ExpiredWhileClosed { .. } => cycle.arm_current(),
            RestoreOutcome::Resumed { .. } | RestoreOutcome::Paused { .. } => {}
        }
        cycle
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn current_phase(&self) -> Phase {
        self.history.current_phase(self.durations.long_break_interval)
    }

    pub fn current_subject(&self) -> Option<&Subject> {
        self.state
            .current_subject
            .as_deref()
            .and_then(|id| self.subjects.find(id))
    }

    pub fn is_current_subject_complete(&self) -> bool {
        self.current_subject()
            .is_some_and(|s| s.is_complete(self.progress.get(&s.id)))
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn timer(&self) -> &BackgroundTimer {
        &self.timer
    }

    pub fn history(&self) -> &BlockHistory {
        &self.history
    }

    pub fn progress(&self) -> &ProgressLedger {
        &self.progress
    }

    pub fn subjects(&self) -> &[Subject] {
        self.subjects.subjects()
    }

    pub fn durations(&self) -> PhaseDurations {
        self.durations
    }

    pub fn restored(&self) -> RestoreOutcome {
        self.restored
    }

    pub fn stats(&self) -> CycleStats {
        CycleStats::from_blocks(self.history.blocks(), &self.durations)
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        let subject = self.current_subject().cloned();
        let subject_minutes = subject.as_ref().map(|s| self.progress.get(&s.id));
        CycleSnapshot {
            phase: self.current_phase(),
            timer: self.timer.state(),
            time_left_secs: self.timer.time_left(),
            subject_complete: self.is_current_subject_complete(),
            subject,
            subject_minutes,
            session_id: self.state.session_id.clone(),
            manual_selection: self.state.manual_selection,
            blocks: self.history.len(),
            next_long_break_in: self.stats().next_long_break_in,
            restored: self.restored,
        }
    }

    /// Outcome produced while opening, if any.
    pub fn take_pending(&mut self) -> Option<Outcome> {
        self.pending.take()
    }

    // ── Subjects ─────────────────────────────────────────────────────

    pub fn select_subject(&mut self, subject_id: &str) -> Result<Outcome, CycleError> {
        let subject = self
            .subjects
            .find(subject_id)
            .ok_or_else(|| CycleError::UnknownSubject(subject_id.to_string()))?;
        let name = subject.name.clone();

        self.set_current(Some(subject_id.to_string()));

        let mut out = Outcome::notice(Notice::info(format!("Selected subject: {name}")));
        out.events.push(Event::SubjectSelected {
            subject_id: subject_id.to_string(),
            at: self.now(),
        });
        Ok(out)
    }

    /// Append a subject to the study order. It becomes the selection when
    /// nothing else is selected.
    pub fn add_subject(&mut self, subject: Subject) -> crate::Result<Outcome> {
        if self.subjects.find(&subject.id).is_some() {
            return Err(CycleError::DuplicateSubject(subject.id).into());
        }
        let id = subject.id.clone();
        let mut out = Outcome::notice(Notice::success(format!("Subject added: {}", subject.name)));
        self.subjects.add(subject)?;

        if self.current_subject().is_none() {
            self.set_current(Some(id.clone()));
            out.events.push(Event::SubjectSelected {
                subject_id: id,
                at: self.now(),
            });
        }
        Ok(out)
    }

    /// Change a subject's name, color or goal. A lowered goal clamps the
    /// subject's progress to it.
    pub fn update_subject(&mut self, subject_id: &str, patch: SubjectPatch) -> crate::Result<Outcome> {
        let updated = self
            .subjects
            .update(subject_id, patch)?
            .cloned()
            .ok_or_else(|| CycleError::UnknownSubject(subject_id.to_string()))?;

        if let Some(goal) = updated.goal() {
            if self.progress.get(subject_id) > goal {
                self.progress.update_progress(subject_id, 0, Some(goal));
            }
        }

        let mut out = Outcome::notice(Notice::success(format!("Subject updated: {}", updated.name)));
        out.events.push(Event::SubjectUpdated {
            subject_id: updated.id,
            at: self.now(),
        });
        Ok(out)
    }

    /// Drop a subject from the study order. Removing the selected subject
    /// selects the first remaining one.
    pub fn remove_subject(&mut self, subject_id: &str) -> crate::Result<Outcome> {
        let removed = self
            .subjects
            .remove(subject_id)?
            .ok_or_else(|| CycleError::UnknownSubject(subject_id.to_string()))?;

        let mut out = Outcome::notice(Notice::success(format!("Subject removed: {}", removed.name)));
        out.events.push(Event::SubjectRemoved {
            subject_id: removed.id,
            at: self.now(),
        });
        if let Some(selected) = self.fallback_selection() {
            out.events.push(Event::SubjectSelected {
                subject_id: selected,
                at: self.now(),
            });
        }
        Ok(out)
    }

    /// Move `subject_id` into the slot held by `over`. The study order
    /// drives automatic advancement and round-robin skips.
    pub fn move_subject(&mut self, subject_id: &str, over: &str) -> crate::Result<Outcome> {
        if !self.subjects.reorder(subject_id, over)? {
            let missing = if self.subjects.find(subject_id).is_none() {
                subject_id
            } else {
                over
            };
            return Err(CycleError::UnknownSubject(missing.to_string()).into());
        }

        let position = self.subjects.position(subject_id).unwrap_or_default();
        debug!(subject_id, position, "subject moved");
        let mut out = Outcome::default();
        out.events.push(Event::SubjectMoved {
            subject_id: subject_id.to_string(),
            position,
            at: self.now(),
        });
        Ok(out)
    }

    /// Replace the cached subject list with the backend's.
    pub fn replace_subjects(&mut self, subjects: Vec<Subject>) -> Result<(), StorageError> {
        self.subjects.replace_all(subjects)?;
        self.fallback_selection();
        Ok(())
    }

    /// Fill missing local progress from backend totals. Local entries win.
    pub fn merge_backend_progress(&mut self, totals: &HashMap<String, u64>) {
        self.progress.merge_backend(self.subjects.subjects(), totals);
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Start, pause or resume the current block.
    pub fn toggle(&mut self) -> Result<Outcome, CycleError> {
        let phase = self.current_phase();
        if phase == Phase::Study {
            self.ensure_studyable()?;
        }

        let mut out = Outcome::default();
        match self.timer.state() {
            TimerState::Paused => {
                if self.timer.resume() {
                    out.events.push(Event::BlockResumed {
                        remaining_secs: self.timer.time_left(),
                        at: self.now(),
                    });
                }
            }
            TimerState::Idle => {
                let nominal = self.durations.timer_seconds(phase);
                let secs = match self.timer.time_left() {
                    0 => nominal,
                    left => left,
                };

                // A study block at its full nominal length has not been run
                // yet and gets a session of its own.
                if phase == Phase::Study && secs == nominal {
                    self.state.manual_selection = false;
                    self.drop_session();
                    out.remote = self
                        .state
                        .current_subject
                        .clone()
                        .map(|subject_id| RemoteCall::OpenSession { subject_id });
                    self.save_state();
                }

                if self.timer.start(secs) {
                    debug!(%phase, secs, "block started");
                    out.events.push(Event::BlockStarted {
                        phase,
                        subject_id: self.state.current_subject.clone(),
                        duration_secs: secs,
                        at: self.now(),
                    });
                }
            }
            TimerState::Running => {
                if self.timer.pause() {
                    out.events.push(Event::BlockPaused {
                        remaining_secs: self.timer.time_left(),
                        at: self.now(),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Credit the current block as skipped and arm the next one.
    ///
    /// A study block of a subject that already met its goal is not
    /// credited; the selection moves round-robin to the next subject.
    pub fn skip_block(&mut self) -> Result<Outcome, CycleError> {
        let phase = self.current_phase();
        if phase == Phase::Study {
            let subject = self.ensure_subject()?;
            if subject.is_complete(self.progress.get(&subject.id)) {
                let id = subject.id.clone();
                return Ok(self.advance_round_robin(&id));
            }
        }

        let mut out = Outcome::default();
        self.credit_block(phase, true, &mut out);
        self.arm_next(&mut out);
        Ok(out)
    }

    /// Pop the last block and rewind the timer to re-run it.
    pub fn previous_block(&mut self) -> Result<Outcome, CycleError> {
        let Some(last) = self.history.last().cloned() else {
            return Ok(Outcome::notice(Notice::info("There is no block to go back to")));
        };

        if let (Some(current), Some(owner)) = (&self.state.current_subject, &last.subject_id) {
            if current != owner {
                return Err(CycleError::CrossSubjectUndo {
                    block_subject: owner.clone(),
                });
            }
        }

        if let Some(id) = last.subject_id.as_deref() {
            let goal = self.subjects.find(id).and_then(Subject::goal);
            self.progress
                .update_progress(id, -i64::from(last.progress_duration), goal);
        }
        self.history.remove_last_block();
        self.timer.reset(u64::from(last.duration) * 60);
        self.state.session_id = None;
        self.state.manual_selection = true;
        self.save_state();

        debug!(phase = %last.kind, duration = last.duration, "block rewound");
        let mut out = Outcome::notice(Notice::success("Went back one block"));
        out.events.push(Event::BlockRewound {
            phase: last.kind,
            subject_id: last.subject_id,
            duration_min: last.duration,
            at: self.now(),
        });
        Ok(out)
    }

    /// Natural expiry of the running block. Always credited.
    pub fn complete_block(&mut self) -> Outcome {
        let phase = self.current_phase();
        let mut out = Outcome::default();
        self.credit_block(phase, false, &mut out);
        if phase == Phase::Study {
            self.advance_if_complete(&mut out);
        }
        self.arm_next(&mut out);
        out
    }

    pub fn reset_current_block(&mut self) -> Outcome {
        let mut out = Outcome::notice(Notice::success("Current block reset"));
        self.arm_current();
        self.drop_session();
        self.save_state();
        out.events.push(Event::PhaseArmed {
            phase: self.current_phase(),
            duration_secs: self.timer.time_left(),
            at: self.now(),
        });
        out
    }

    /// Zero one subject's progress.
    ///
    /// With `also_reset_long_break_counter` the whole ledger is cleared so
    /// the long-break cadence restarts; otherwise only this subject's study
    /// blocks are removed.
    pub fn reset_subject(
        &mut self,
        subject_id: &str,
        also_reset_long_break_counter: bool,
    ) -> Result<Outcome, CycleError> {
        if self.subjects.find(subject_id).is_none() && !self.progress.contains(subject_id) {
            return Err(CycleError::UnknownSubject(subject_id.to_string()));
        }

        self.progress.reset_progress(subject_id);
        if also_reset_long_break_counter {
            self.history.clear();
        } else {
            let removed = self.history.remove_subject_study_blocks(subject_id);
            debug!(subject_id, removed, "subject study blocks removed");
        }
        self.arm_current();
        self.drop_session();
        self.save_state();

        let message = if also_reset_long_break_counter {
            "Subject and long break counter reset"
        } else {
            "Subject reset (long break counter kept)"
        };
        let mut out = Outcome::notice(Notice::success(message));
        out.events.push(Event::SubjectReset {
            subject_id: subject_id.to_string(),
            cleared_history: also_reset_long_break_counter,
            at: self.now(),
        });
        Ok(out)
    }

    /// Clear the ledger and every subject's progress.
    pub fn reset_cycle(&mut self) -> Outcome {
        self.history.clear();
        let ids: Vec<String> = self.subjects.ids().map(str::to_string).collect();
        self.progress.reset_all_progress(ids.iter().map(String::as_str));
        self.timer.reset(self.durations.timer_seconds(Phase::Study));
        self.state.manual_selection = false;
        self.drop_session();
        self.save_state();

        info!("study cycle reset");
        let mut out = Outcome::notice(Notice::success("Cycle fully reset"));
        out.events.push(Event::CycleReset { at: self.now() });
        out
    }

    /// Fold the result of a backend write into the cycle.
    pub fn record_remote(&mut self, status: RemoteStatus) -> Vec<Notice> {
        match status {
            RemoteStatus::SessionOpened { session_id } => {
                self.state.session_id = Some(session_id);
                self.save_state();
                Vec::new()
            }
            RemoteStatus::SessionOpenedWithoutId => {
                self.state.session_id = None;
                self.save_state();
                vec![Notice::warning(
                    "Session created without an id; rewards for this block are not guaranteed",
                )]
            }
            RemoteStatus::SessionOpenFailed { error } => {
                self.state.session_id = None;
                self.save_state();
                vec![Notice::error(format!(
                    "Could not create a study session ({error}); this block will not earn coins or XP"
                ))]
            }
            RemoteStatus::SessionClosed {
                subject_name,
                rewards,
            } => {
                let name = subject_name.unwrap_or_else(|| "study".to_string());
                if rewards.coins_earned > 0 || rewards.xp_earned > 0 {
                    vec![Notice::success(format!(
                        "Block of {name} complete: +{} coins, +{} XP",
                        rewards.coins_earned, rewards.xp_earned
                    ))]
                } else {
                    vec![Notice::warning(format!(
                        "Block of {name} complete but no reward was received"
                    ))]
                }
            }
            RemoteStatus::SessionCloseFailed { error } => vec![Notice::error(format!(
                "Could not save the session ({error}); local progress kept, reward not guaranteed"
            ))],
            RemoteStatus::Offline => Vec::new(),
        }
    }

    /// Write pending progress now.
    pub fn flush(&mut self) {
        self.progress.flush();
    }

    /// Forget the running countdown and flush progress.
    pub fn teardown(&mut self) {
        self.timer.teardown();
        self.progress.flush();
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Point the selection at `subject_id`. Changing subject drops the open
    /// session, which belongs to the previous subject's block.
    fn set_current(&mut self, subject_id: Option<String>) {
        if self.state.current_subject != subject_id {
            self.drop_session();
            self.state.current_subject = subject_id;
        }
        self.state.manual_selection = false;
        self.save_state();
    }

    /// Select the first subject when the selection is empty or stale.
    /// Returns the newly selected id.
    fn fallback_selection(&mut self) -> Option<String> {
        if self.current_subject().is_some() {
            return None;
        }
        let first = self.subjects.subjects().first().map(|s| s.id.clone());
        if first.is_none() && self.state.current_subject.is_none() {
            return None;
        }
        if let Some(stale) = self.state.current_subject.as_deref() {
            warn!(subject_id = stale, "selected subject no longer exists");
        }
        debug!(subject_id = ?first, "selecting the first subject");
        self.set_current(first.clone());
        first
    }

    /// Forget the session id. Callers persist the state.
    fn drop_session(&mut self) {
        if let Some(session_id) = self.state.session_id.take() {
            debug!(%session_id, "session dropped");
        }
    }

    fn ensure_subject(&self) -> Result<&Subject, CycleError> {
        let id = self
            .state
            .current_subject
            .as_deref()
            .ok_or(CycleError::NoSubjectSelected)?;
        self.subjects
            .find(id)
            .ok_or_else(|| CycleError::UnknownSubject(id.to_string()))
    }

    fn ensure_studyable(&self) -> Result<(), CycleError> {
        let subject = self.ensure_subject()?;
        if subject.is_complete(self.progress.get(&subject.id)) {
            return Err(CycleError::SubjectComplete {
                name: subject.name.clone(),
            });
        }
        Ok(())
    }

    /// Append the block for `phase` and credit the selected subject.
    fn credit_block(&mut self, phase: Phase, skipped: bool, out: &mut Outcome) {
        let subject_id = self.state.current_subject.clone();
        let duration = self.durations.timer_minutes(phase);
        let credit = self.durations.progress_minutes(phase);

        let mut subject_name = None;
        if let Some(id) = subject_id.as_deref() {
            let subject = self.subjects.find(id);
            subject_name = subject.map(|s| s.name.clone());
            let goal = subject.and_then(Subject::goal);
            self.progress.update_progress(id, i64::from(credit), goal);
        }
        self.history.add_block(Block::new(
            phase,
            duration,
            credit,
            subject_id.clone(),
            skipped,
        ));
        info!(%phase, subject_id = ?subject_id, skipped, duration, "block recorded");

        if phase == Phase::Study {
            if let Some(session_id) = self.state.session_id.take() {
                self.save_state();
                out.remote = Some(RemoteCall::CloseSession {
                    session_id,
                    subject_name,
                    duration_min: duration,
                    skipped,
                });
            }
        }

        let at = self.now();
        if skipped {
            out.notices
                .push(Notice::info(format!("{} skipped (credited)", phase.label())));
            out.events.push(Event::BlockSkipped {
                phase,
                subject_id,
                duration_min: duration,
                at,
            });
        } else {
            if phase.is_break() || out.remote.is_none() {
                out.notices
                    .push(Notice::success(format!("{} complete", phase.label())));
            }
            out.events.push(Event::BlockCompleted {
                phase,
                subject_id,
                duration_min: duration,
                at,
            });
        }
    }

    fn advance_if_complete(&mut self, out: &mut Outcome) {
        let Some(subject) = self.current_subject().cloned() else {
            return;
        };
        if !subject.is_complete(self.progress.get(&subject.id)) {
            return;
        }

        match self.subjects.next_in_order(&subject.id).cloned() {
            Some(next) => {
                info!(from = %subject.id, to = %next.id, "subject goal reached; advancing");
                self.set_current(Some(next.id.clone()));
                out.notices.push(Notice::success(format!(
                    "{} complete! Switching to {}",
                    subject.name, next.name
                )));
                out.events.push(Event::SubjectAdvanced {
                    from: subject.id,
                    to: next.id,
                    at: self.now(),
                });
            }
            None => {
                info!(subject_id = %subject.id, "last subject reached its goal");
                self.state.manual_selection = true;
                out.notices.push(Notice::success(
                    "Congratulations! You completed the whole study cycle",
                ));
            }
        }
        self.save_state();
    }

    fn advance_round_robin(&mut self, subject_id: &str) -> Outcome {
        if self.timer.is_running() {
            self.timer.pause();
        }
        let Some(next) = self.subjects.next_round_robin(subject_id).cloned() else {
            return Outcome::default();
        };

        self.set_current(Some(next.id.clone()));

        let mut out = Outcome::notice(Notice::info(format!("Next subject: {}", next.name)));
        out.events.push(Event::SubjectAdvanced {
            from: subject_id.to_string(),
            to: next.id,
            at: self.now(),
        });
        out
    }

    /// Reset the engine to the nominal length of the current phase.
    fn arm_current(&mut self) {
        let secs = self.durations.timer_seconds(self.current_phase());
        self.timer.reset(secs);
    }

    fn arm_next(&mut self, out: &mut Outcome) {
        let next = self.current_phase();
        let secs = self.durations.timer_seconds(next);
        self.timer.reset(secs);
        out.notices
            .push(Notice::info(format!("Next: {}", next.label())));
        out.events.push(Event::PhaseArmed {
            phase: next,
            duration_secs: secs,
            at: self.now(),
        });
    }

    fn now(&self) -> DateTime<Utc> {
        i64::try_from(self.clock.now_ms())
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    fn save_state(&self) {
        let result = serde_json::to_string(&self.state)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(keys::CYCLE_STATE, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist cycle state");
        }
    }
}

fn load_state(store: &dyn KeyValueStore) -> CycleState {
    match store.get(keys::CYCLE_STATE) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "discarding malformed cycle state");
            CycleState::default()
        }),
        Ok(None) => CycleState::default(),
        Err(e) => {
            warn!(error = %e, "could not read cycle state");
            CycleState::default()
        }
    }
}

impl Tick for CycleController {
    type Output = Outcome;

    /// Recompute the countdown and run the completion path on expiry.
    fn tick(&mut self) -> Option<Outcome> {
        self.progress.flush_if_due(Instant::now());
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        self.timer.tick()?;
        Some(self.complete_block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionRewards;
    use crate::storage::MemoryStore;
    use crate::timer::ManualClock;

    const T0: u64 = 1_700_000_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        cycle: CycleController,
    }

    fn fixture(goals: &[(&str, u64)]) -> Fixture {
        fixture_with(goals, TimerConfig::default())
    }

    fn fixture_with(goals: &[(&str, u64)], config: TimerConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cycle = CycleController::open(store.clone(), clock.clone(), &config);
        for (id, goal) in goals {
            cycle.add_subject(Subject::new(*id, id.to_uppercase(), *goal)).unwrap();
        }
        Fixture { store, clock, cycle }
    }

    impl Fixture {
        fn reopen(&self, config: &TimerConfig) -> CycleController {
            CycleController::open(self.store.clone(), self.clock.clone(), config)
        }

        /// Start the current block and let it run out.
        fn run_block(&mut self) -> Outcome {
            let secs = self.cycle.timer().time_left();
            self.cycle.toggle().unwrap();
            self.clock.advance_secs(secs);
            self.cycle.tick().expect("block should complete")
        }
    }

    fn kinds(cycle: &CycleController) -> Vec<(Phase, Option<String>)> {
        cycle
            .history()
            .blocks()
            .iter()
            .map(|b| (b.kind, b.subject_id.clone()))
            .collect()
    }

    #[test]
    fn empty_ledger_starts_with_study() {
        let f = fixture(&[]);
        assert_eq!(f.cycle.current_phase(), Phase::Study);
        assert_eq!(f.cycle.timer().time_left(), 3000);
    }

    #[test]
    fn toggle_requires_a_subject_for_study() {
        let mut f = fixture(&[]);
        assert_eq!(f.cycle.toggle(), Err(CycleError::NoSubjectSelected));
        assert_eq!(f.cycle.timer().state(), TimerState::Idle);
    }

    #[test]
    fn toggle_opens_session_only_for_fresh_study_block() {
        let mut f = fixture(&[("math", 100)]);
        f.cycle.select_subject("math").unwrap();

        let started = f.cycle.toggle().unwrap();
        assert_eq!(
            started.remote,
            Some(RemoteCall::OpenSession {
                subject_id: "math".into()
            })
        );
        assert!(f.cycle.timer().is_running());
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess-1".into(),
        });

        f.clock.advance_secs(60);
        let paused = f.cycle.toggle().unwrap();
        assert!(matches!(paused.events[0], Event::BlockPaused { remaining_secs: 2940, .. }));

        let resumed = f.cycle.toggle().unwrap();
        assert!(resumed.remote.is_none());
        assert!(matches!(resumed.events[0], Event::BlockResumed { .. }));
        assert_eq!(f.cycle.state().session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn fresh_block_never_reuses_an_earlier_session() {
        let mut f = fixture(&[("math", 200), ("bio", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "S-math".into(),
        });
        f.clock.advance_secs(30);
        f.cycle.toggle().unwrap();
        f.cycle.reset_current_block();
        assert!(f.cycle.state().session_id.is_none());

        f.cycle.select_subject("bio").unwrap();
        let started = f.cycle.toggle().unwrap();
        assert_eq!(
            started.remote,
            Some(RemoteCall::OpenSession {
                subject_id: "bio".into()
            })
        );

        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "S-bio".into(),
        });
        f.clock.advance_secs(3000);
        let done = f.cycle.tick().unwrap();
        assert!(matches!(
            done.remote,
            Some(RemoteCall::CloseSession { ref session_id, .. }) if session_id == "S-bio"
        ));
    }

    #[test]
    fn changing_subject_or_resetting_drops_the_session() {
        let mut f = fixture(&[("math", 0), ("bio", 0)]);
        let open = |f: &mut Fixture| {
            f.cycle.record_remote(RemoteStatus::SessionOpened {
                session_id: "sess".into(),
            });
        };

        open(&mut f);
        f.cycle.select_subject("math").unwrap();
        assert_eq!(f.cycle.state().session_id.as_deref(), Some("sess"));
        f.cycle.select_subject("bio").unwrap();
        assert!(f.cycle.state().session_id.is_none());

        open(&mut f);
        f.cycle.reset_subject("bio", false).unwrap();
        assert!(f.cycle.state().session_id.is_none());

        open(&mut f);
        f.cycle.reset_cycle();
        assert!(f.cycle.state().session_id.is_none());
    }

    #[test]
    fn natural_completion_credits_and_arms_next_phase() {
        let mut f = fixture(&[("math", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess-1".into(),
        });
        f.clock.advance_secs(3000);

        let out = f.cycle.tick().unwrap();
        assert_eq!(
            out.remote,
            Some(RemoteCall::CloseSession {
                session_id: "sess-1".into(),
                subject_name: Some("MATH".into()),
                duration_min: 50,
                skipped: false,
            })
        );
        assert_eq!(f.cycle.progress().get("math"), 50);
        assert_eq!(f.cycle.current_phase(), Phase::ShortBreak);
        assert_eq!(f.cycle.timer().state(), TimerState::Idle);
        assert_eq!(f.cycle.timer().time_left(), 600);
        assert!(f.cycle.state().session_id.is_none());
        assert!(!f.cycle.history().blocks()[0].skipped);
    }

    #[test]
    fn fourth_study_block_leads_to_long_break() {
        let mut f = fixture(&[("free", 0)]);
        f.cycle.select_subject("free").unwrap();
        for _ in 0..3 {
            f.run_block();
            f.run_block();
        }
        assert_eq!(f.cycle.stats().study_blocks, 3);
        assert_eq!(f.cycle.current_phase(), Phase::Study);

        f.run_block();
        assert_eq!(f.cycle.current_phase(), Phase::LongBreak);
        assert_eq!(f.cycle.timer().time_left(), 1800);

        let before = f.cycle.progress().get("free");
        f.run_block();
        assert_eq!(f.cycle.progress().get("free"), before + 10);
        assert_eq!(f.cycle.history().last().unwrap().duration, 30);
    }

    #[test]
    fn reaching_goal_advances_in_order_then_asks_for_manual_pick() {
        let mut f = fixture(&[("math", 50), ("bio", 50)]);
        f.cycle.select_subject("math").unwrap();

        let out = f.run_block();
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, Event::SubjectAdvanced { to, .. } if to == "bio")));
        assert_eq!(f.cycle.current_subject().unwrap().id, "bio");

        f.run_block();
        f.run_block();
        assert_eq!(f.cycle.current_subject().unwrap().id, "bio");
        assert!(f.cycle.state().manual_selection);
        assert!(f.cycle.is_current_subject_complete());
    }

    #[test]
    fn toggle_rejects_complete_subject() {
        let mut f = fixture(&[("math", 50)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.run_block();
        assert_eq!(
            f.cycle.toggle(),
            Err(CycleError::SubjectComplete {
                name: "MATH".into()
            })
        );
        assert_eq!(f.cycle.timer().state(), TimerState::Idle);
    }

    #[test]
    fn skip_credits_block_and_closes_session() {
        let mut f = fixture(&[("math", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess-9".into(),
        });
        f.clock.advance_secs(120);

        let out = f.cycle.skip_block().unwrap();
        assert!(matches!(
            out.remote,
            Some(RemoteCall::CloseSession { skipped: true, duration_min: 50, .. })
        ));
        let last = f.cycle.history().last().unwrap();
        assert!(last.skipped);
        assert_eq!(last.duration, 50);
        assert_eq!(f.cycle.progress().get("math"), 50);
        assert_eq!(f.cycle.current_phase(), Phase::ShortBreak);
        assert_eq!(f.cycle.timer().time_left(), 600);
    }

    #[test]
    fn skip_on_complete_subject_moves_round_robin_without_crediting() {
        let mut f = fixture(&[("math", 100), ("bio", 50)]);
        f.cycle.select_subject("bio").unwrap();
        f.cycle.skip_block().unwrap();
        f.cycle.skip_block().unwrap();
        assert!(f.cycle.is_current_subject_complete());
        let len = f.cycle.history().len();

        let out = f.cycle.skip_block().unwrap();
        assert_eq!(f.cycle.history().len(), len);
        assert_eq!(f.cycle.current_subject().unwrap().id, "math");
        assert!(out.remote.is_none());
    }

    #[test]
    fn skip_study_without_subject_fails() {
        let mut f = fixture(&[]);
        assert_eq!(f.cycle.skip_block(), Err(CycleError::NoSubjectSelected));
        assert!(f.cycle.history().is_empty());
    }

    #[test]
    fn previous_block_reverses_credit_and_rewinds() {
        let mut f = fixture(&[("math", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.run_block();
        assert_eq!(f.cycle.progress().get("math"), 60);
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "stale".into(),
        });

        f.cycle.previous_block().unwrap();
        assert_eq!(f.cycle.progress().get("math"), 50);
        assert_eq!(f.cycle.history().len(), 1);
        assert_eq!(f.cycle.current_phase(), Phase::ShortBreak);
        assert_eq!(f.cycle.timer().time_left(), 600);
        assert!(f.cycle.state().session_id.is_none());
        assert!(f.cycle.state().manual_selection);
    }

    #[test]
    fn previous_block_on_empty_ledger_is_a_notice() {
        let mut f = fixture(&[]);
        let out = f.cycle.previous_block().unwrap();
        assert_eq!(out.notices[0].level, NoticeLevel::Info);
        assert!(out.events.is_empty());
    }

    #[test]
    fn previous_block_refuses_other_subjects_block() {
        let mut f = fixture(&[("math", 200), ("bio", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.cycle.select_subject("bio").unwrap();

        let blocks_before = f.cycle.history().blocks().to_vec();
        let progress_before = f.cycle.progress().entries().clone();
        let time_left = f.cycle.timer().time_left();

        assert_eq!(
            f.cycle.previous_block(),
            Err(CycleError::CrossSubjectUndo {
                block_subject: "math".into()
            })
        );
        assert_eq!(f.cycle.history().blocks(), blocks_before.as_slice());
        assert_eq!(f.cycle.progress().entries(), &progress_before);
        assert_eq!(f.cycle.timer().time_left(), time_left);
    }

    #[test]
    fn reset_subject_removes_only_its_study_blocks() {
        let mut f = fixture(&[("math", 0), ("bio", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.run_block();
        f.cycle.select_subject("bio").unwrap();
        f.run_block();
        f.run_block();
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.run_block();
        let phase_before = f.cycle.current_phase();

        f.cycle.reset_subject("math", false).unwrap();
        assert_eq!(
            kinds(&f.cycle),
            vec![
                (Phase::ShortBreak, Some("math".to_string())),
                (Phase::Study, Some("bio".to_string())),
                (Phase::ShortBreak, Some("bio".to_string())),
                (Phase::ShortBreak, Some("math".to_string())),
            ]
        );
        assert_eq!(f.cycle.current_phase(), phase_before);
        assert_eq!(f.cycle.progress().get("math"), 0);
        assert_eq!(f.cycle.progress().get("bio"), 60);
        assert_eq!(f.cycle.timer().time_left(), 3000);
    }

    #[test]
    fn reset_subject_arms_the_phase_left_by_the_filter() {
        let mut f = fixture(&[("math", 0), ("bio", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.run_block();
        f.cycle.select_subject("bio").unwrap();
        f.run_block();
        assert_eq!(f.cycle.current_phase(), Phase::ShortBreak);

        f.cycle.reset_subject("math", false).unwrap();
        assert_eq!(f.cycle.current_phase(), Phase::ShortBreak);
        assert_eq!(f.cycle.timer().time_left(), 600);
    }

    #[test]
    fn reset_subject_with_counter_clears_ledger() {
        let mut f = fixture(&[("math", 0), ("bio", 0)]);
        f.cycle.select_subject("bio").unwrap();
        f.run_block();
        f.cycle.select_subject("math").unwrap();
        f.run_block();

        f.cycle.reset_subject("math", true).unwrap();
        assert!(f.cycle.history().is_empty());
        assert_eq!(f.cycle.progress().get("bio"), 50);
        assert_eq!(
            f.cycle.reset_subject("nope", true),
            Err(CycleError::UnknownSubject("nope".into()))
        );
    }

    #[test]
    fn reset_cycle_clears_everything() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.run_block();
        f.cycle.reset_cycle();
        assert!(f.cycle.history().is_empty());
        assert_eq!(f.cycle.progress().get("math"), 0);
        assert_eq!(f.cycle.current_phase(), Phase::Study);
        assert_eq!(f.cycle.timer().time_left(), 3000);
    }

    #[test]
    fn reset_current_block_rearms_without_touching_ledger() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.clock.advance_secs(100);
        f.cycle.reset_current_block();
        assert_eq!(f.cycle.timer().state(), TimerState::Idle);
        assert_eq!(f.cycle.timer().time_left(), 3000);
        assert!(f.cycle.history().is_empty());
    }

    #[test]
    fn failed_backend_calls_keep_local_state() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        let notices = f.cycle.record_remote(RemoteStatus::SessionOpenFailed {
            error: "connection refused".into(),
        });
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(f.cycle.timer().is_running());

        f.clock.advance_secs(3000);
        let out = f.cycle.tick().unwrap();
        assert!(out.remote.is_none());
        assert_eq!(f.cycle.progress().get("math"), 50);

        let closed = f.cycle.record_remote(RemoteStatus::SessionCloseFailed {
            error: "timeout".into(),
        });
        assert!(closed[0].message.contains("reward not guaranteed"));
        assert_eq!(f.cycle.history().len(), 1);
    }

    #[test]
    fn reward_notice_reports_coins() {
        let mut f = fixture(&[]);
        let notices = f.cycle.record_remote(RemoteStatus::SessionClosed {
            subject_name: Some("Math".into()),
            rewards: SessionRewards {
                coins_earned: 5,
                xp_earned: 20,
            },
        });
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert!(notices[0].message.contains("+5 coins"));
    }

    #[test]
    fn state_survives_reopen() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess-2".into(),
        });
        f.clock.advance_secs(1000);

        let reopened = f.reopen(&TimerConfig::default());
        assert_eq!(reopened.current_subject().unwrap().id, "math");
        assert_eq!(reopened.state().session_id.as_deref(), Some("sess-2"));
        assert_eq!(reopened.restored(), RestoreOutcome::Resumed { time_left_secs: 2000 });
    }

    #[test]
    fn block_left_running_by_a_one_shot_command_is_credited() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess-1".into(),
        });
        f.clock.advance_secs(3001);

        let mut reopened = f.reopen(&TimerConfig::default());
        assert!(matches!(reopened.restored(), RestoreOutcome::ExpiredUnattended { .. }));
        let pending = reopened.take_pending().unwrap();
        assert!(matches!(
            pending.remote,
            Some(RemoteCall::CloseSession { ref session_id, skipped: false, .. }) if session_id == "sess-1"
        ));
        assert_eq!(reopened.history().len(), 1);
        assert_eq!(reopened.progress().get("math"), 50);
        assert_eq!(reopened.current_phase(), Phase::ShortBreak);
        assert_eq!(reopened.timer().time_left(), 600);
    }

    #[test]
    fn expired_block_is_not_credited_by_default() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.teardown();
        f.clock.advance_secs(3100);

        let mut reopened = f.reopen(&TimerConfig::default());
        assert!(matches!(reopened.restored(), RestoreOutcome::ExpiredWhileClosed { .. }));
        assert!(reopened.history().is_empty());
        assert!(reopened.take_pending().is_none());
        assert_eq!(reopened.timer().time_left(), 3000);
    }

    #[test]
    fn expired_block_can_be_credited_on_open() {
        let config = TimerConfig {
            credit_expired_on_restore: true,
            ..TimerConfig::default()
        };
        let mut f = fixture_with(&[("math", 0)], config.clone());
        f.cycle.select_subject("math").unwrap();
        f.cycle.toggle().unwrap();
        f.cycle.teardown();
        f.clock.advance_secs(3100);

        let mut reopened = f.reopen(&config);
        let pending = reopened.take_pending().unwrap();
        assert!(matches!(
            pending.events[0],
            Event::BlockCompleted { phase: Phase::Study, .. }
        ));
        assert_eq!(reopened.history().len(), 1);
        assert_eq!(reopened.current_phase(), Phase::ShortBreak);
    }

    #[test]
    fn select_unknown_subject_fails() {
        let mut f = fixture(&[("math", 0)]);
        assert_eq!(
            f.cycle.select_subject("art"),
            Err(CycleError::UnknownSubject("art".into()))
        );
    }

    #[test]
    fn replacing_subjects_falls_back_to_the_first() {
        let mut f = fixture(&[("math", 0)]);
        f.cycle.select_subject("math").unwrap();
        let mut art = Subject::new("art", "Art", 60);
        art.order = 2;
        let mut bio = Subject::new("bio", "Bio", 60);
        bio.order = 1;
        f.cycle.replace_subjects(vec![art, bio]).unwrap();
        assert_eq!(f.cycle.state().current_subject.as_deref(), Some("bio"));

        f.cycle.replace_subjects(Vec::new()).unwrap();
        assert!(f.cycle.state().current_subject.is_none());
        f.cycle
            .replace_subjects(vec![Subject::new("bio", "Bio", 60)])
            .unwrap();

        let totals: HashMap<String, u64> = [("bio".to_string(), 25)].into_iter().collect();
        f.cycle.merge_backend_progress(&totals);
        assert_eq!(f.cycle.progress().get("bio"), 25);
    }

    #[test]
    fn goal_zero_subject_never_auto_advances() {
        let mut f = fixture(&[("free", 0), ("bio", 100)]);
        f.cycle.select_subject("free").unwrap();
        let out = f.run_block();
        assert!(!out
            .events
            .iter()
            .any(|e| matches!(e, Event::SubjectAdvanced { .. })));
        assert_eq!(f.cycle.current_subject().unwrap().id, "free");
        assert!(!f.cycle.state().manual_selection);
        assert!(!f.cycle.is_current_subject_complete());
    }

    #[test]
    fn first_added_subject_is_selected() {
        let mut f = fixture(&[]);
        let out = f.cycle.add_subject(Subject::new("math", "Math", 100)).unwrap();
        assert!(matches!(out.events[0], Event::SubjectSelected { .. }));
        let out = f.cycle.add_subject(Subject::new("bio", "Bio", 100)).unwrap();
        assert!(out.events.is_empty());
        assert_eq!(f.cycle.current_subject().unwrap().id, "math");

        assert!(matches!(
            f.cycle.add_subject(Subject::new("bio", "Again", 1)),
            Err(crate::CoreError::Cycle(CycleError::DuplicateSubject(_)))
        ));

        let reopened = f.reopen(&TimerConfig::default());
        assert_eq!(reopened.current_subject().unwrap().id, "math");
    }

    #[test]
    fn removing_selected_subject_selects_first_remaining() {
        let mut f = fixture(&[("math", 100), ("bio", 100), ("art", 100)]);
        f.cycle.select_subject("bio").unwrap();
        f.cycle.record_remote(RemoteStatus::SessionOpened {
            session_id: "sess".into(),
        });

        let out = f.cycle.remove_subject("bio").unwrap();
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, Event::SubjectSelected { subject_id, .. } if subject_id == "math")));
        assert!(f.cycle.state().session_id.is_none());
        assert_eq!(f.cycle.subjects().len(), 2);

        f.cycle.remove_subject("art").unwrap();
        assert_eq!(f.cycle.current_subject().unwrap().id, "math");
        assert!(matches!(
            f.cycle.remove_subject("art"),
            Err(crate::CoreError::Cycle(CycleError::UnknownSubject(_)))
        ));
    }

    #[test]
    fn moved_subject_changes_advancement_order() {
        let mut f = fixture(&[("math", 50), ("bio", 100), ("art", 100)]);
        f.cycle.move_subject("art", "bio").unwrap();
        let ids: Vec<&str> = f.cycle.subjects().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["math", "art", "bio"]);

        f.cycle.select_subject("math").unwrap();
        f.run_block();
        assert_eq!(f.cycle.current_subject().unwrap().id, "art");

        assert!(f.cycle.move_subject("nope", "art").is_err());
    }

    #[test]
    fn lowering_a_goal_clamps_progress() {
        let mut f = fixture(&[("math", 200)]);
        f.cycle.select_subject("math").unwrap();
        f.cycle.skip_block().unwrap();
        assert_eq!(f.cycle.progress().get("math"), 50);

        let patch = SubjectPatch {
            time_goal: Some(30),
            ..SubjectPatch::default()
        };
        f.cycle.update_subject("math", patch).unwrap();
        assert_eq!(f.cycle.progress().get("math"), 30);
        assert!(f.cycle.is_current_subject_complete());
    }
}
