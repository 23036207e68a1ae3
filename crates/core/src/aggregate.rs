//! Entity state machine trait for event-sourced domain models.

use crate::id::EntityKey;

/// Optimistic concurrency expectation for an entity stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for migrations, imports, etc.).
    Any,
    /// Require the stream to be at an exact version (0 = empty stream).
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Outcome of handling one command: the events to append plus the reply
/// returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<E, R> {
    pub events: Vec<E>,
    pub reply: R,
}

impl<E, R> Decision<E, R> {
    /// Emit `events` and answer with `reply`.
    pub fn emit(events: Vec<E>, reply: R) -> Self {
        Self { events, reply }
    }

    /// Answer without emitting anything (read-only commands).
    pub fn reply(reply: R) -> Self {
        Self {
            events: Vec::new(),
            reply,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.events.is_empty()
    }
}

/// Event-sourced entity semantics (pure, deterministic).
///
/// - **Initial state**: `initial_state(key)` builds the zero value for a new key.
/// - **State evolution**: `apply(self, event)` folds one event into a new state.
/// - **Decision logic**: `handle(&self, cmd)` returns events plus a reply.
///
/// The state is passed by value and never shared: `apply` consumes the prior
/// state and returns the next one, and `handle` only borrows it. Implementations
/// must not perform IO or side effects.
pub trait EntityStateMachine: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    /// Stable entity type identifier (e.g. "warehouse.product").
    const ENTITY_TYPE: &'static str;

    type Command: Clone + core::fmt::Debug + Send + Sync;
    type Event: Clone + core::fmt::Debug + Send + Sync;
    type Reply: Clone + core::fmt::Debug + Send;
    type Error: core::fmt::Debug;

    /// Zero-value state for a brand-new key. Must not consult external state.
    fn initial_state(key: &EntityKey) -> Self;

    /// Fold a single event into the state.
    ///
    /// Must be deterministic: the same state and event always produce the same
    /// result. Returns an error if the event would break a state invariant.
    fn apply(self, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(
        &self,
        command: &Self::Command,
    ) -> Result<Decision<Self::Event, Self::Reply>, Self::Error>;
}

/// Fold a sequence of events onto `state`, in order.
pub fn fold<'a, A>(
    state: A,
    events: impl IntoIterator<Item = &'a A::Event>,
) -> Result<A, A::Error>
where
    A: EntityStateMachine,
{
    events.into_iter().try_fold(state, |acc, ev| acc.apply(ev))
}
