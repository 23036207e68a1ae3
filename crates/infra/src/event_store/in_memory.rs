use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use warehouse_core::{EntityKey, ExpectedVersion};

use super::r#trait::{EventLog, EventLogError, StoredEvent, UncommittedEvent};

/// In-memory append-only event log.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: RwLock<HashMap<EntityKey, Vec<StoredEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Number of events stored for `key`.
    pub fn stream_len(&self, key: &EntityKey) -> usize {
        self.streams
            .read()
            .map(|s| s.get(key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        key: &EntityKey,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let entity_type = events[0].entity_type.clone();
        if let Some(idx) = events.iter().position(|e| e.entity_type != entity_type) {
            return Err(EventLogError::EntityTypeMismatch(format!(
                "batch contains multiple entity types (index {idx})"
            )));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        let stream = streams.entry(key.clone()).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventLogError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // A stream belongs to exactly one entity type.
        if let Some(existing) = stream.first() {
            if existing.entity_type != entity_type {
                return Err(EventLogError::EntityTypeMismatch(format!(
                    "stream entity_type is '{}', attempted append with '{}'",
                    existing.entity_type, entity_type
                )));
            }
        }

        let recorded_at = Utc::now();
        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                entity_key: key.clone(),
                entity_type: e.entity_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                recorded_at,
                payload: e.payload,
            })
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    async fn read_since(
        &self,
        key: &EntityKey,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        let after = after.unwrap_or(0);
        Ok(streams
            .get(key)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_number > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
