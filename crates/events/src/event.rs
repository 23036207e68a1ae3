use serde_json::Value as JsonValue;
use thiserror::Error;

/// A payload could not be decoded into a known event type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to decode '{event_type}' payload: {message}")]
pub struct EventDecodeError {
    pub event_type: String,
    pub message: String,
}

impl EventDecodeError {
    pub fn new(event_type: impl Into<String>, message: impl ToString) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.to_string(),
        }
    }
}

/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - **self-describing**: the `event_type` plus the JSON payload is enough to
///   decode the event again, which is how it is stored and delivered.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    /// Stable event kind identifier (e.g. "StockChanged").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// Serialize the event body (without the kind tag).
    fn to_payload(&self) -> Result<JsonValue, serde_json::Error>;

    /// Decode an event from its kind and body.
    ///
    /// Returns `Ok(None)` for kinds this type does not know, so consumers can
    /// decide whether an unknown kind is an error (replay) or simply ignored
    /// (projections that only consume a subset of the schema).
    fn decode(event_type: &str, payload: JsonValue) -> Result<Option<Self>, EventDecodeError>;
}
