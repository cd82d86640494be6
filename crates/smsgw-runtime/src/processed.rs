//! [`ProcessedSet`] – identifiers already forwarded and acknowledged.
//!
//! Lives for the process only; a restart begins empty.  Only the poll task
//! inserts.  Everyone else gets read access through a cloned handle.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone, Debug, Default)]
pub struct ProcessedSet {
    ids: Arc<RwLock<HashSet<u32>>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Record `id`.  Returns `false` if it was already present.
    pub(crate) fn insert(&self, id: u32) -> bool {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> BTreeSet<u32> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}
