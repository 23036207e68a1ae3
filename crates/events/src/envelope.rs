use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warehouse_core::EntityKey;

/// Envelope for an event, containing stream metadata.
///
/// This is the unit delivered to projections over the bus.
///
/// Notes:
/// - **Append-only**: `sequence_number` is monotonically increasing per entity
///   stream, starting at 1.
/// - `event_type` + `payload` are enough to decode the event.
/// - Delivery is at-least-once: the same envelope may arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    entity_key: EntityKey,
    entity_type: String,

    /// Monotonically increasing position in the entity stream.
    sequence_number: u64,

    event_type: String,
    recorded_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        entity_key: EntityKey,
        entity_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            entity_key,
            entity_type: entity_type.into(),
            sequence_number,
            event_type: event_type.into(),
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_key(&self) -> &EntityKey {
        &self.entity_key
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
