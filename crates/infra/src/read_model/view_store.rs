use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use warehouse_core::EntityKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewStoreError {
    #[error("view store unavailable: {0}")]
    Unavailable(String),
}

/// Projected state of one key together with the cursor it was derived at.
///
/// The pair is persisted as one record, so a reader never sees a state that is
/// ahead of or behind its cursor. `state` stays `None` while the key has only
/// seen events the projection does not materialize.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord<S> {
    pub state: Option<S>,
    /// Sequence number of the last event applied for the key.
    pub last_sequence_number: u64,
}

impl<S> Default for ViewRecord<S> {
    fn default() -> Self {
        Self {
            state: None,
            last_sequence_number: 0,
        }
    }
}

/// Key/value store for disposable read models.
pub trait ViewStore<S>: Send + Sync {
    fn load(&self, key: &EntityKey) -> Result<Option<ViewRecord<S>>, ViewStoreError>;

    /// Replace the record for `key` in one write.
    fn save(&self, key: &EntityKey, record: ViewRecord<S>) -> Result<(), ViewStoreError>;

    /// Drop the record for `key` (rebuild support).
    fn remove(&self, key: &EntityKey) -> Result<(), ViewStoreError>;

    /// All records, ordered by key.
    fn list(&self) -> Result<Vec<(EntityKey, ViewRecord<S>)>, ViewStoreError>;
}

impl<V, S> ViewStore<V> for Arc<S>
where
    S: ViewStore<V> + ?Sized,
{
    fn load(&self, key: &EntityKey) -> Result<Option<ViewRecord<V>>, ViewStoreError> {
        (**self).load(key)
    }

    fn save(&self, key: &EntityKey, record: ViewRecord<V>) -> Result<(), ViewStoreError> {
        (**self).save(key, record)
    }

    fn remove(&self, key: &EntityKey) -> Result<(), ViewStoreError> {
        (**self).remove(key)
    }

    fn list(&self) -> Result<Vec<(EntityKey, ViewRecord<V>)>, ViewStoreError> {
        (**self).list()
    }
}

/// In-memory view store for tests/dev.
#[derive(Debug)]
pub struct InMemoryViewStore<S> {
    inner: RwLock<BTreeMap<EntityKey, ViewRecord<S>>>,
}

impl<S> InMemoryViewStore<S> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<S> Default for InMemoryViewStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ViewStoreError {
    ViewStoreError::Unavailable("view store lock poisoned".to_string())
}

impl<S> ViewStore<S> for InMemoryViewStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn load(&self, key: &EntityKey) -> Result<Option<ViewRecord<S>>, ViewStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn save(&self, key: &EntityKey, record: ViewRecord<S>) -> Result<(), ViewStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(key.clone(), record);
        Ok(())
    }

    fn remove(&self, key: &EntityKey) -> Result<(), ViewStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(EntityKey, ViewRecord<S>)>, ViewStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
