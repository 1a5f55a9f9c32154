//! Per-subject progress ledger.
//!
//! Accumulated studied minutes keyed by subject id. All adjustments go
//! through [`ProgressLedger::update_progress`], which clamps the result to
//! `[0, goal]`. Writes to the store are debounced: a change marks the map
//! dirty and [`ProgressLedger::flush_if_due`] writes it once the quiet
//! period has elapsed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::storage::{keys, KeyValueStore};
use crate::subject::Subject;

pub struct ProgressLedger {
    minutes: BTreeMap<String, u64>,
    store: Arc<dyn KeyValueStore>,
    debounce: Duration,
    /// Time of the last unpersisted change.
    dirty_since: Option<Instant>,
}

impl ProgressLedger {
    /// Rehydrate from `store`; malformed data starts from an empty map.
    pub fn load(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        let minutes = match store.get(keys::LOCAL_PROGRESS) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "discarding malformed progress map");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "could not read progress map; starting empty");
                BTreeMap::new()
            }
        };
        Self {
            minutes,
            store,
            debounce,
            dirty_since: None,
        }
    }

    pub fn get(&self, subject_id: &str) -> u64 {
        self.minutes.get(subject_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.minutes.contains_key(subject_id)
    }

    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.minutes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Apply `delta` minutes and clamp to `[0, goal]` (`None` is unbounded).
    ///
    /// Returns the new value.
    pub fn update_progress(&mut self, subject_id: &str, delta: i64, goal: Option<u64>) -> u64 {
        let old = i128::from(self.get(subject_id));
        let upper = i128::from(goal.unwrap_or(u64::MAX));
        let next = (old + i128::from(delta)).clamp(0, upper);
        // `next` lies in [0, u64::MAX] after the clamp.
        let next = u64::try_from(next).unwrap_or(0);

        debug!(subject_id, delta, ?goal, old = %old, next, "progress updated");
        self.minutes.insert(subject_id.to_string(), next);
        self.touch();
        next
    }

    pub fn reset_progress(&mut self, subject_id: &str) {
        self.minutes.insert(subject_id.to_string(), 0);
        self.touch();
    }

    /// Replace the whole map with zeroed entries for `subject_ids`.
    pub fn reset_all_progress<'a, I>(&mut self, subject_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.minutes = subject_ids.into_iter().map(|id| (id.to_string(), 0)).collect();
        self.touch();
    }

    /// Fill in subjects missing locally from backend-reported totals.
    ///
    /// Entries already present locally win.
    pub fn merge_backend(&mut self, subjects: &[Subject], backend_totals: &HashMap<String, u64>) {
        let mut added = 0usize;
        for subject in subjects {
            if !self.minutes.contains_key(&subject.id) {
                let total = backend_totals.get(&subject.id).copied().unwrap_or(0);
                self.minutes.insert(subject.id.clone(), total);
                added += 1;
            }
        }
        if added > 0 {
            debug!(added, "merged backend progress");
            self.touch();
        }
    }

    /// Persist if dirty and the debounce window has passed since the last change.
    pub fn flush_if_due(&mut self, now: Instant) -> bool {
        match self.dirty_since {
            Some(since) if now.saturating_duration_since(since) >= self.debounce => {
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Persist immediately if anything changed.
    pub fn flush(&mut self) {
        if self.dirty_since.take().is_none() {
            return;
        }
        let result = serde_json::to_string(&self.minutes)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(keys::LOCAL_PROGRESS, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist progress map");
        }
    }

    fn touch(&mut self) {
        self.dirty_since = Some(Instant::now());
    }
}

impl Drop for ProgressLedger {
    fn drop(&mut self) {
        self.flush();
    }
}
