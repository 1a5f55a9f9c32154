//! Block history ledger.
//!
//! An ordered record of completed or skipped blocks. Entries are never
//! edited in place: the ledger grows by appending and shrinks only by
//! popping its tail or by filtering on reset. Every mutation writes the
//! whole ledger back to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::phase::{self, Phase};
use crate::storage::{keys, KeyValueStore};

/// One study or break interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: Phase,
    pub timestamp: DateTime<Utc>,
    /// Minutes credited to the timer and phase sequencing.
    pub duration: u32,
    /// Minutes credited to the subject progress bar.
    pub progress_duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl Block {
    pub fn new(
        kind: Phase,
        duration: u32,
        progress_duration: u32,
        subject_id: Option<String>,
        skipped: bool,
    ) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            duration,
            progress_duration,
            subject_id,
            skipped,
        }
    }

    pub fn belongs_to(&self, subject_id: &str) -> bool {
        self.subject_id.as_deref() == Some(subject_id)
    }
}

pub struct BlockHistory {
    blocks: Vec<Block>,
    store: Arc<dyn KeyValueStore>,
}

impl BlockHistory {
    /// Rehydrate the ledger from `store`.
    ///
    /// Missing or malformed data yields an empty ledger.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let blocks = match store.get(keys::BLOCK_HISTORY) {
            Ok(Some(json)) => serde_json::from_str::<Vec<Block>>(&json).unwrap_or_else(|e| {
                warn!(error = %e, "discarding malformed block history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read block history; starting empty");
                Vec::new()
            }
        };
        debug!(len = blocks.len(), "block history loaded");
        Self { blocks, store }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn current_phase(&self, long_break_interval: u32) -> Phase {
        phase::current_phase(&self.blocks, long_break_interval)
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
        self.persist();
    }

    /// Pop the most recent block, if any.
    pub fn remove_last_block(&mut self) -> Option<Block> {
        let popped = self.blocks.pop();
        if popped.is_some() {
            self.persist();
        }
        popped
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.persist();
    }

    /// Keep only the blocks matching `keep`, preserving their order.
    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&Block) -> bool,
    {
        let before = self.blocks.len();
        self.blocks.retain(keep);
        let removed = before - self.blocks.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Excise one subject's study blocks, leaving breaks and other subjects alone.
    pub fn remove_subject_study_blocks(&mut self, subject_id: &str) -> usize {
        self.retain(|b| !(b.kind == Phase::Study && b.belongs_to(subject_id)))
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.blocks)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(keys::BLOCK_HISTORY, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist block history");
        }
    }
}
