//! Snapshot persistence boundary.
//!
//! A snapshot is a cached fold result at a stream position. It only bounds
//! replay cost: losing one (or failing to decode it) costs a longer replay,
//! never correctness.

pub mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use thiserror::Error;

use warehouse_core::EntityKey;

pub use in_memory::InMemorySnapshotStore;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),

    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// Point-in-time state of one entity.
///
/// `sequence_number` is the position of the last event folded into `state`;
/// replay resumes at `sequence_number + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_key: EntityKey,
    pub entity_type: String,
    pub sequence_number: u64,
    pub taken_at: DateTime<Utc>,
    pub state: JsonValue,
}

impl Snapshot {
    /// Serialize a typed state taken at `sequence_number`.
    pub fn capture<A: Serialize>(
        entity_key: EntityKey,
        entity_type: impl Into<String>,
        sequence_number: u64,
        state: &A,
    ) -> Result<Self, SnapshotStoreError> {
        let state = serde_json::to_value(state)
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))?;
        Ok(Self {
            entity_key,
            entity_type: entity_type.into(),
            sequence_number,
            taken_at: Utc::now(),
            state,
        })
    }

    /// Decode the stored state.
    pub fn restore<A: DeserializeOwned>(&self) -> Result<A, SnapshotStoreError> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))
    }
}

/// Key-partitioned snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot. A snapshot older than the one already stored for the
    /// key must not replace it.
    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), SnapshotStoreError>;

    /// Latest snapshot for `key`, if any.
    async fn read_latest_snapshot(
        &self,
        key: &EntityKey,
    ) -> Result<Option<Snapshot>, SnapshotStoreError>;
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), SnapshotStoreError> {
        (**self).write_snapshot(snapshot).await
    }

    async fn read_latest_snapshot(
        &self,
        key: &EntityKey,
    ) -> Result<Option<Snapshot>, SnapshotStoreError> {
        (**self).read_latest_snapshot(key).await
    }
}
