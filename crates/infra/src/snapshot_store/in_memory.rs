use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use warehouse_core::EntityKey;

use super::{Snapshot, SnapshotStore, SnapshotStoreError};

/// In-memory snapshot store for tests/dev. Keeps only the latest snapshot per key.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<EntityKey, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| SnapshotStoreError::Unavailable("lock poisoned".to_string()))?;

        match snapshots.get(&snapshot.entity_key) {
            Some(existing) if existing.sequence_number >= snapshot.sequence_number => {}
            _ => {
                snapshots.insert(snapshot.entity_key.clone(), snapshot);
            }
        }
        Ok(())
    }

    async fn read_latest_snapshot(
        &self,
        key: &EntityKey,
    ) -> Result<Option<Snapshot>, SnapshotStoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| SnapshotStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(snapshots.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EntityKey {
        EntityKey::new("p1").unwrap()
    }

    #[tokio::test]
    async fn keeps_the_newest_snapshot() {
        let store = InMemorySnapshotStore::new();
        store
            .write_snapshot(Snapshot::capture(key(), "warehouse.product", 200, &2u32).unwrap())
            .await
            .unwrap();
        store
            .write_snapshot(Snapshot::capture(key(), "warehouse.product", 100, &1u32).unwrap())
            .await
            .unwrap();

        let latest = store.read_latest_snapshot(&key()).await.unwrap().unwrap();
        assert_eq!(latest.sequence_number, 200);
        assert_eq!(latest.restore::<u32>().unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_key_has_no_snapshot() {
        let store = InMemorySnapshotStore::new();
        assert!(store.read_latest_snapshot(&key()).await.unwrap().is_none());
    }
}
