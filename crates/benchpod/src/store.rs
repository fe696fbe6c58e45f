//! Concurrent keyed storage for runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::run::Run;

/// A thread-safe in-memory run store.
///
/// Clones share the same map. Each operation holds the lock for one map
/// access only and never across an `.await`, so a long-running execution
/// task cannot stall readers or other runs.
#[derive(Debug, Clone, Default)]
pub struct RunStore {
    runs: Arc<RwLock<HashMap<Uuid, Run>>>,
}

impl RunStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a run by id.
    pub fn save(&self, run: Run) {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.id, run);
    }

    /// Overwrite an existing run. Same semantics as [`RunStore::save`].
    pub fn update(&self, run: Run) {
        self.save(run);
    }

    /// Insert a run only if its id is unused. Returns whether it was inserted.
    pub fn insert_new(&self, run: Run) -> bool {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(&run.id) {
            return false;
        }
        runs.insert(run.id, run);
        true
    }

    /// Snapshot of a run.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<Run> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Apply `f` to a stored run under the write lock.
    ///
    /// Returns `None` if the run does not exist. Check-then-write transitions
    /// go through here so two writers cannot interleave on one run.
    pub fn modify<R>(&self, id: &Uuid, f: impl FnOnce(&mut Run) -> R) -> Option<R> {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
            .map(f)
    }

    /// All runs, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
