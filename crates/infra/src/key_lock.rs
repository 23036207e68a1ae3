//! Per-key lock table.
//!
//! Work on one entity key is serialized through the key's lock while distinct
//! keys never contend. Entries nobody holds or waits on are pruned lazily.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use warehouse_core::EntityKey;

#[derive(Debug)]
pub(crate) struct KeyedLocks<L> {
    locks: Mutex<HashMap<EntityKey, Arc<L>>>,
}

impl<L: Default> KeyedLocks<L> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Shared handle to the lock for `key`.
    pub(crate) fn get(&self, key: &EntityKey) -> Arc<L> {
        // The table only ever holds plain handles, so a poisoned guard is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
