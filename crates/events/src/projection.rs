use thiserror::Error;

use warehouse_core::EntityKey;

use crate::Event;

/// A fold function rejected an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FoldError {
    /// The event cannot be applied in the current position of the stream
    /// (e.g. an update arriving before the event that creates the record).
    /// Indicates a log-ordering or delivery bug upstream.
    #[error("projection ordering violation: {0}")]
    OrderingViolation(String),

    /// Applying the event would corrupt the read model (e.g. overflow).
    #[error("projection invariant violated: {0}")]
    InvariantViolation(String),
}

/// A projection builds a read model from an append-only event stream.
///
/// Projections implement the **CQRS read model pattern**: they fold the same
/// events the write side produces into a separate, query-oriented state whose
/// shape is independent of the entity state.
///
/// ## Contract
///
/// `apply` is a pure fold over one entity key: given the prior projected state
/// (absent if the key has never been projected) and one event, it returns the
/// new projected state. Returning `Ok(None)` means the key stays unprojected.
///
/// Event kinds the projection has no fold for must be returned unchanged; a
/// projection is allowed to consume only a subset of the event schema.
///
/// ## Idempotency
///
/// The fold itself does not need to detect duplicates. Sequence tracking (and
/// therefore safety under at-least-once delivery) is the job of the component
/// driving the projection, which skips events at or below its cursor.
///
/// ## Disposability
///
/// Read models can be dropped and rebuilt from the event log at any time.
pub trait Projection: Send + Sync {
    type Ev: Event;
    type State: Clone + core::fmt::Debug + Send + Sync;

    /// Stable projection name (used in logs and checkpoints).
    fn name(&self) -> &str;

    /// Whether events of this entity type feed the projection. Envelopes of
    /// other entity types are skipped without touching any cursor.
    fn handles(&self, entity_type: &str) -> bool {
        let _ = entity_type;
        true
    }

    /// Fold one event into the projected state for `key`.
    fn apply(
        &self,
        key: &EntityKey,
        event: &Self::Ev,
        prior: Option<&Self::State>,
    ) -> Result<Option<Self::State>, FoldError>;
}
