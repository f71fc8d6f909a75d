//! Pending-operation sets
//!
//! A key sits in the set for exactly as long as the [`PendingGuard`] returned
//! by [`PendingSet::try_acquire`] is alive. Check and insert happen under one
//! lock, so two callers can never both acquire the same key.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct PendingSet {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as pending, or return `None` if it already is.
    pub fn try_acquire(&self, key: &str) -> Option<PendingGuard> {
        let inserted = self.keys.lock().insert(key.to_string());
        inserted.then(|| PendingGuard {
            keys: self.keys.clone(),
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

/// Removes its key from the set when dropped.
pub struct PendingGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl PendingGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}
