//! In-memory, last-write-wins map of pending intents.

use crate::file_op::{Action, FileChangeIntent};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to the pending-intent map. Cloning yields another handle to the same map;
/// every access goes through the inner mutex.
#[derive(Debug, Clone, Default)]
pub struct ChangeAggregator {
    inner: Arc<Mutex<HashMap<PathBuf, Action>>>,
}

impl ChangeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot for the intent's path.
    pub fn record(&self, intent: FileChangeIntent) {
        self.lock().insert(intent.path, intent.action);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn get(&self, path: &std::path::Path) -> Option<Action> {
        self.lock().get(path).copied()
    }

    /// Take the whole map and leave an empty one behind, under a single lock acquisition.
    pub fn snapshot_and_clear(&self) -> Vec<FileChangeIntent> {
        let taken = std::mem::take(&mut *self.lock());
        taken
            .into_iter()
            .map(|(path, action)| FileChangeIntent { path, action })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Action>> {
        // a panic mid-insert cannot leave the map half-written
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
