//! Subjects and the locally cached subject list.
//!
//! Subjects belong to the backend; the catalog is a read-mostly cache kept
//! in the store so the cycle can run offline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::storage::{keys, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    /// Weekly goal in minutes. Zero means no goal.
    #[serde(default)]
    pub time_goal: u64,
    #[serde(default)]
    pub order: i64,
}

fn default_color() -> String {
    "#3b82f6".into()
}

impl Subject {
    pub fn new(id: impl Into<String>, name: impl Into<String>, time_goal: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: default_color(),
            time_goal,
            order: 0,
        }
    }

    /// Upper bound for progress, `None` when no goal is set.
    pub fn goal(&self) -> Option<u64> {
        (self.time_goal > 0).then_some(self.time_goal)
    }

    /// Whether `studied` minutes meet a non-zero goal.
    pub fn is_complete(&self, studied: u64) -> bool {
        self.goal().is_some_and(|goal| studied >= goal)
    }
}

/// Fields to change on an existing subject. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub time_goal: Option<u64>,
}

impl SubjectPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.time_goal.is_none()
    }

    fn apply(self, subject: &mut Subject) {
        if let Some(name) = self.name {
            subject.name = name;
        }
        if let Some(color) = self.color {
            subject.color = color;
        }
        if let Some(goal) = self.time_goal {
            subject.time_goal = goal;
        }
    }
}

pub struct SubjectCatalog {
    subjects: Vec<Subject>,
    store: Arc<dyn KeyValueStore>,
}

impl SubjectCatalog {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let mut subjects: Vec<Subject> = match store.get(keys::SUBJECTS) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "discarding malformed subject cache");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read subject cache");
                Vec::new()
            }
        };
        subjects.sort_by_key(|s| s.order);
        Self { subjects, store }
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn find(&self, id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.id.as_str())
    }

    /// Append a subject at the end of the list order.
    pub fn add(&mut self, mut subject: Subject) -> Result<(), StorageError> {
        subject.order = self.subjects.last().map(|s| s.order + 1).unwrap_or(0);
        self.subjects.push(subject);
        self.save()
    }

    /// Apply `patch` to the subject `id`. Returns the updated subject, or
    /// `None` when there is no such subject.
    pub fn update(&mut self, id: &str, patch: SubjectPatch) -> Result<Option<&Subject>, StorageError> {
        let Some(idx) = self.position(id) else {
            return Ok(None);
        };
        patch.apply(&mut self.subjects[idx]);
        self.save()?;
        Ok(self.subjects.get(idx))
    }

    /// Drop the subject `id`; the remaining subjects keep their relative order.
    pub fn remove(&mut self, id: &str) -> Result<Option<Subject>, StorageError> {
        let Some(idx) = self.position(id) else {
            return Ok(None);
        };
        let removed = self.subjects.remove(idx);
        self.renumber();
        self.save()?;
        Ok(Some(removed))
    }

    /// Move `id` to the slot currently held by `over`, shifting the
    /// subjects in between. Returns false when either id is unknown.
    pub fn reorder(&mut self, id: &str, over: &str) -> Result<bool, StorageError> {
        let (Some(from), Some(to)) = (self.position(id), self.position(over)) else {
            return Ok(false);
        };
        if from != to {
            let subject = self.subjects.remove(from);
            self.subjects.insert(to, subject);
            self.renumber();
            self.save()?;
        }
        Ok(true)
    }

    /// Replace the cache with the backend's list.
    pub fn replace_all(&mut self, mut subjects: Vec<Subject>) -> Result<(), StorageError> {
        subjects.sort_by_key(|s| s.order);
        self.subjects = subjects;
        self.save()
    }

    /// The subject after `id`, wrapping to the first.
    pub fn next_round_robin(&self, id: &str) -> Option<&Subject> {
        let idx = self.position(id)?;
        self.subjects.get((idx + 1) % self.subjects.len())
    }

    /// The subject after `id`, or `None` when `id` is last.
    pub fn next_in_order(&self, id: &str) -> Option<&Subject> {
        let idx = self.position(id)?;
        self.subjects.get(idx + 1)
    }

    /// Zero-based place of `id` in the study order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.subjects.iter().position(|s| s.id == id)
    }

    fn renumber(&mut self) {
        for (order, subject) in (0..).zip(self.subjects.iter_mut()) {
            subject.order = order;
        }
    }

    fn save(&self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.subjects)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        self.store.set(keys::SUBJECTS, &json)
    }
}
