use serde_json::Value as JsonValue;
use thiserror::Error;

use warehouse_core::{Decision, EntityStateMachine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandDecodeError {
    /// No handler is registered for this command kind.
    #[error("unknown command kind: {0}")]
    UnknownKind(String),

    /// The kind is known but the payload does not match its shape.
    #[error("invalid '{kind}' payload: {message}")]
    Payload { kind: String, message: String },
}

impl CommandDecodeError {
    pub fn payload(kind: impl Into<String>, message: impl ToString) -> Self {
        Self::Payload {
            kind: kind.into(),
            message: message.to_string(),
        }
    }
}

/// A command addressed to one entity (command abstraction).
///
/// Commands represent **intent** and are **transient** (never persisted); the
/// events they produce are what gets stored.
///
/// Inside the process commands are closed enums matched exhaustively. The
/// string `kind` only exists at the raw entry point, where `decode` turns
/// `(kind, payload)` into the typed command or reports an unknown kind.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    /// Stable command kind identifier (e.g. "UpdateStock").
    fn kind(&self) -> &'static str;

    /// Decode a command from its kind and JSON payload.
    fn decode(kind: &str, payload: JsonValue) -> Result<Self, CommandDecodeError>;
}

/// Execute a command in memory (no IO, no async).
///
/// Decides on the current state and folds the emitted events into the next
/// state. Useful for tests and inline processing; for the persistent pipeline
/// use the infrastructure `CommandDispatcher`.
pub fn execute<A>(
    state: A,
    command: &A::Command,
) -> Result<(A, Decision<A::Event, A::Reply>), A::Error>
where
    A: EntityStateMachine,
{
    let decision = state.handle(command)?;
    let next = warehouse_core::fold(state, &decision.events)?;
    Ok((next, decision))
}
