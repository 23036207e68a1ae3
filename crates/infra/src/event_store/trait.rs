use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use warehouse_core::{EntityKey, ExpectedVersion};
use warehouse_events::{Event, EventDecodeError, EventEnvelope};

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: returned by the state machine's `handle()`
/// 2. **UncommittedEvent**: serialized, with kind/version metadata
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: published to the bus for projections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub entity_type: String,

    pub event_type: String,
    pub event_version: u32,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are per entity key, start at 1, and have no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub entity_key: EntityKey,
    pub entity_type: String,

    /// Monotonically increasing position in the entity stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub recorded_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode the payload into a typed event (`Ok(None)` for unknown kinds).
    pub fn decode<E: Event>(&self) -> Result<Option<E>, EventDecodeError> {
        E::decode(&self.event_type, self.payload.clone())
    }

    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.entity_key.clone(),
            self.entity_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.recorded_at,
            self.payload.clone(),
        )
    }
}

/// Event log operation error.
///
/// These are **infrastructure errors** as opposed to domain errors.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("entity type mismatch: {0}")]
    EntityTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backend could not be reached or is in an unusable state.
    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, key-partitioned event log.
///
/// One stream per entity key. Within a stream, events have monotonically
/// increasing sequence numbers (1, 2, 3, ...). Appends and reads are the only
/// operations that may suspend; implementations partition by key, so no global
/// lock is implied.
///
/// ## Append Semantics
///
/// `append()`:
/// - checks the expected stream version (optimistic concurrency)
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists the batch atomically, in order (all or nothing)
/// - returns the committed events; their first/last sequence numbers are the
///   appended range
///
/// ## Read Semantics
///
/// `read_since(key, after)` returns the events with `sequence_number > after`
/// (all events when `after` is `None`), in order. Unknown keys yield an empty
/// stream.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(
        &self,
        key: &EntityKey,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventLogError>;

    async fn read_since(
        &self,
        key: &EntityKey,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventLogError>;
}

#[async_trait]
impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    async fn append(
        &self,
        key: &EntityKey,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).append(key, events, expected_version).await
    }

    async fn read_since(
        &self,
        key: &EntityKey,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).read_since(key, after).await
    }
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E>(
        entity_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventLogError>
    where
        E: Event,
    {
        let payload = event.to_payload().map_err(|e| {
            EventLogError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            entity_type: entity_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            payload,
        })
    }
}
