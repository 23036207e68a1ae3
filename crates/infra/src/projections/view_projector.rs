//! Cursor-guarded driver for a [`Projection`].
//!
//! The projector owns, per entity key, the projected state and the sequence
//! number of the last event applied to it. Both live in one [`ViewRecord`] and
//! are written together. Events at or below the cursor are duplicates and are
//! dropped, which makes the projector safe under at-least-once delivery.
//!
//! Work on one key is serialized through a per-key lock; distinct keys proceed
//! in parallel.

use std::sync::{Mutex, PoisonError};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use warehouse_core::EntityKey;
use warehouse_events::{Event, EventDecodeError, EventEnvelope, FoldError, Projection};

use crate::event_store::{EventLog, EventLogError, StoredEvent};
use crate::key_lock::KeyedLocks;
use crate::read_model::{InMemoryViewStore, ViewRecord, ViewStore, ViewStoreError};

#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event cannot be applied at this point of the stream. Needs an operator.
    #[error("ordering violation for '{key}' at sequence {sequence_number}: {reason}")]
    OrderingViolation {
        key: EntityKey,
        sequence_number: u64,
        reason: String,
    },

    #[error("invariant violated for '{key}' at sequence {sequence_number}: {reason}")]
    InvariantViolation {
        key: EntityKey,
        sequence_number: u64,
        reason: String,
    },

    /// The view has applied events the log does not hold.
    #[error("cursor {cursor} for '{key}' is ahead of the log head {head}")]
    CursorAheadOfLog {
        key: EntityKey,
        cursor: u64,
        head: u64,
    },

    /// Sequence numbers start at 1.
    #[error("invalid sequence number 0 for '{0}'")]
    InvalidSequence(EntityKey),

    #[error(transparent)]
    Decode(#[from] EventDecodeError),

    #[error(transparent)]
    Store(#[from] ViewStoreError),

    #[error(transparent)]
    Log(#[from] EventLogError),
}

#[derive(Debug)]
pub struct ViewProjector<P, S = InMemoryViewStore<<P as Projection>::State>>
where
    P: Projection,
{
    projection: P,
    store: S,
    locks: KeyedLocks<Mutex<()>>,
}

impl<P> ViewProjector<P>
where
    P: Projection,
    P::State: 'static,
{
    /// Projector backed by an in-memory view store.
    pub fn in_memory(projection: P) -> Self {
        Self::new(projection, InMemoryViewStore::new())
    }
}

impl<P, S> ViewProjector<P, S>
where
    P: Projection,
    S: ViewStore<P::State>,
{
    pub fn new(projection: P, store: S) -> Self {
        Self {
            projection,
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.projection.name()
    }

    /// Apply one typed event at `sequence_number` and return the projected state.
    ///
    /// A duplicate (sequence number at or below the cursor) changes nothing and
    /// returns the current state.
    pub fn apply(
        &self,
        key: &EntityKey,
        sequence_number: u64,
        event: &P::Ev,
    ) -> Result<Option<P::State>, ProjectionError> {
        self.apply_at(key, sequence_number, Some(event))
    }

    /// Raw event entry point: `(entity key, sequence number, event kind, payload)`.
    ///
    /// Kinds the projection's event type does not know advance the cursor and
    /// leave the state unchanged.
    pub fn apply_raw(
        &self,
        key: &EntityKey,
        sequence_number: u64,
        kind: &str,
        payload: JsonValue,
    ) -> Result<Option<P::State>, ProjectionError> {
        let event = <P::Ev as Event>::decode(kind, payload)?;
        if event.is_none() {
            debug!(
                projection = self.name(),
                entity_key = %key,
                sequence_number,
                kind,
                "event kind not projected"
            );
        }
        self.apply_at(key, sequence_number, event.as_ref())
    }

    /// Apply a published envelope. Envelopes of entity types the projection
    /// does not handle are skipped.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if !self.projection.handles(envelope.entity_type()) {
            return Ok(());
        }
        self.apply_raw(
            envelope.entity_key(),
            envelope.sequence_number(),
            envelope.event_type(),
            envelope.payload().clone(),
        )?;
        Ok(())
    }

    pub fn get(&self, key: &EntityKey) -> Result<Option<P::State>, ProjectionError> {
        Ok(self.store.load(key)?.and_then(|record| record.state))
    }

    /// Sequence number of the last event applied for `key` (0 if none).
    pub fn cursor(&self, key: &EntityKey) -> Result<u64, ProjectionError> {
        Ok(self
            .store
            .load(key)?
            .map(|record| record.last_sequence_number)
            .unwrap_or(0))
    }

    /// Every projected state, ordered by key.
    pub fn list(&self) -> Result<Vec<(EntityKey, P::State)>, ProjectionError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter_map(|(key, record)| record.state.map(|state| (key, state)))
            .collect())
    }

    /// Drop the projected state and cursor for `key`.
    pub fn reset(&self, key: &EntityKey) -> Result<(), ProjectionError> {
        let lock = self.locks.get(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(key)?;
        Ok(())
    }

    /// Apply every logged event after the cursor for `key`, returning how many
    /// were applied. Recovers deliveries the bus lost.
    pub async fn catch_up<L>(&self, key: &EntityKey, log: &L) -> Result<usize, ProjectionError>
    where
        L: EventLog + ?Sized,
    {
        let cursor = self.cursor(key)?;
        let missed = log.read_since(key, (cursor > 0).then_some(cursor)).await?;

        let mut applied = 0;
        for stored in &missed {
            // Live delivery may have moved the cursor past this event meanwhile.
            if stored.sequence_number <= self.cursor(key)? {
                continue;
            }
            self.apply_stored(key, stored)?;
            applied += 1;
        }

        if applied > 0 {
            info!(projection = self.name(), entity_key = %key, applied, "caught up from log");
        }
        Ok(applied)
    }

    /// Rebuild the projected state for `key` from its full log.
    ///
    /// The replacement is folded aside and swapped in under the key's lock, so
    /// a failed rebuild leaves the previous record in place. Events delivered
    /// live while the log was being read are folded in from the log tail before
    /// the swap; the cursor never moves backwards.
    pub async fn rebuild<L>(&self, key: &EntityKey, log: &L) -> Result<(), ProjectionError>
    where
        L: EventLog + ?Sized,
    {
        let mut record = ViewRecord::default();
        let mut after = None;
        loop {
            for stored in log.read_since(key, after).await? {
                let event = <P::Ev as Event>::decode(&stored.event_type, stored.payload)?;
                record = self.fold_record(key, record, stored.sequence_number, event.as_ref())?;
            }
            let head = record.last_sequence_number;

            {
                let lock = self.locks.get(key);
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let live = self
                    .store
                    .load(key)?
                    .map(|r| r.last_sequence_number)
                    .unwrap_or(0);
                if live <= head {
                    if head == 0 {
                        self.store.remove(key)?;
                    } else {
                        self.store.save(key, record)?;
                    }
                    info!(projection = self.name(), entity_key = %key, head, "view rebuilt");
                    return Ok(());
                }
                if after == Some(head) {
                    return Err(ProjectionError::CursorAheadOfLog {
                        key: key.clone(),
                        cursor: live,
                        head,
                    });
                }
                debug!(
                    projection = self.name(),
                    entity_key = %key,
                    head,
                    live,
                    "live deliveries passed the rebuild, reading log tail"
                );
            }
            after = Some(head);
        }
    }

    fn apply_stored(&self, key: &EntityKey, stored: &StoredEvent) -> Result<(), ProjectionError> {
        self.apply_raw(
            key,
            stored.sequence_number,
            &stored.event_type,
            stored.payload.clone(),
        )?;
        Ok(())
    }

    fn apply_at(
        &self,
        key: &EntityKey,
        sequence_number: u64,
        event: Option<&P::Ev>,
    ) -> Result<Option<P::State>, ProjectionError> {
        if sequence_number == 0 {
            return Err(ProjectionError::InvalidSequence(key.clone()));
        }

        let lock = self.locks.get(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let record = self.store.load(key)?.unwrap_or_default();
        let last = record.last_sequence_number;
        if sequence_number <= last {
            debug!(
                projection = self.name(),
                entity_key = %key,
                sequence_number,
                last,
                "duplicate delivery ignored"
            );
            return Ok(record.state);
        }
        if sequence_number > last + 1 {
            warn!(
                projection = self.name(),
                entity_key = %key,
                sequence_number,
                last,
                "sequence gap"
            );
        }

        let record = self.fold_record(key, record, sequence_number, event)?;
        let state = record.state.clone();
        self.store.save(key, record)?;
        Ok(state)
    }

    fn fold_record(
        &self,
        key: &EntityKey,
        record: ViewRecord<P::State>,
        sequence_number: u64,
        event: Option<&P::Ev>,
    ) -> Result<ViewRecord<P::State>, ProjectionError> {
        let state = match event {
            Some(event) => self
                .projection
                .apply(key, event, record.state.as_ref())
                .map_err(|err| self.fold_error(key, sequence_number, err))?,
            None => record.state,
        };
        Ok(ViewRecord {
            state,
            last_sequence_number: sequence_number,
        })
    }

    fn fold_error(&self, key: &EntityKey, sequence_number: u64, err: FoldError) -> ProjectionError {
        match err {
            FoldError::OrderingViolation(reason) => {
                error!(
                    projection = self.name(),
                    entity_key = %key,
                    sequence_number,
                    reason = %reason,
                    "projection ordering violation"
                );
                ProjectionError::OrderingViolation {
                    key: key.clone(),
                    sequence_number,
                    reason,
                }
            }
            FoldError::InvariantViolation(reason) => ProjectionError::InvariantViolation {
                key: key.clone(),
                sequence_number,
                reason,
            },
        }
    }
}
