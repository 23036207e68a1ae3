//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Restore state: latest snapshot (or initial state) for the key
//!   ↓
//! 2. Replay events strictly after the snapshot
//!   ↓
//! 3. Handle command (pure decision logic, produces events + reply)
//!   ↓
//! 4. Append events to the log (atomic, expected-version checked, bounded by a timeout)
//!   ↓
//! 5. Publish committed events to the bus
//!   ↓
//! 6. Snapshot when enough events accumulated since the last one, then reply
//! ```
//!
//! Steps 1–4 run under a per-key lock, so two commands for the same entity can
//! never interleave their read-modify-append sequence. Commands for different
//! keys proceed concurrently.
//!
//! A dispatch may be cancelled (its future dropped) at any point up to the
//! append. Once the append succeeded the command is committed: publication
//! happens before the next suspension point and the snapshot is written on a
//! spawned task, so both complete even if the caller goes away.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use warehouse_core::{DomainError, EntityKey, EntityStateMachine, ExpectedVersion};
use warehouse_events::{Command, CommandDecodeError, Event, EventBus, EventEnvelope};

use crate::config::{ConfigError, RuntimeConfig};
use crate::event_store::{EventLog, EventLogError, StoredEvent, UncommittedEvent};
use crate::key_lock::KeyedLocks;
use crate::snapshot_store::{Snapshot, SnapshotStore};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the command kind (raw entry point).
    #[error("unknown command kind: {0}")]
    UnknownCommandKind(String),

    /// The command kind is known but its payload is malformed.
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),

    /// The entity key is blank.
    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Domain invariant failure (deterministic); nothing was appended.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// History could not be read or folded back into state.
    #[error("replay failed: {0}")]
    ReplayFailure(String),

    /// The append did not complete in time; nothing was committed.
    #[error("append timed out after {0:?}")]
    AppendTimeout(Duration),

    /// Another writer appended between replay and append.
    #[error("optimistic concurrency conflict: {0}")]
    Concurrency(String),

    /// The log rejected the append.
    #[error("event log error: {0}")]
    Log(EventLogError),

    /// The reply could not be encoded for the caller.
    #[error("failed to encode reply: {0}")]
    Encode(String),
}

impl DispatchError {
    /// Infrastructure failures where re-running the whole dispatch is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::ReplayFailure(_)
                | DispatchError::AppendTimeout(_)
                | DispatchError::Concurrency(_)
                | DispatchError::Log(_)
        )
    }
}

impl From<EventLogError> for DispatchError {
    fn from(value: EventLogError) -> Self {
        match value {
            EventLogError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Log(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => DispatchError::InvalidKey(msg),
        }
    }
}

impl From<CommandDecodeError> for DispatchError {
    fn from(value: CommandDecodeError) -> Self {
        match value {
            CommandDecodeError::UnknownKind(kind) => DispatchError::UnknownCommandKind(kind),
            payload @ CommandDecodeError::Payload { .. } => {
                DispatchError::InvalidPayload(payload.to_string())
            }
        }
    }
}

/// State rebuilt for one dispatch.
struct Restored<A> {
    state: A,
    /// Sequence number of the last event folded into `state` (0 = empty stream).
    version: u64,
    /// Sequence number of the snapshot replay started from (0 = none).
    snapshot_version: u64,
}

/// Reusable command execution engine for event-sourced entities.
///
/// Generic over the collaborators so tests and dev builds can run with the
/// in-memory log/store/bus while production swaps in durable backends:
///
/// - `L`: event log
/// - `S`: snapshot store
/// - `B`: event bus committed events are published on
///
/// The dispatcher keeps no entity state between commands: each dispatch
/// re-reads the snapshot and the log, which is what makes retrying a failed
/// dispatch safe.
#[derive(Debug)]
pub struct CommandDispatcher<L, S, B> {
    log: Arc<L>,
    snapshots: Arc<S>,
    bus: B,
    config: RuntimeConfig,
    locks: KeyedLocks<tokio::sync::Mutex<()>>,
}

impl<L, S, B> CommandDispatcher<L, S, B> {
    pub fn new(log: L, snapshots: S, bus: B, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            log: Arc::new(log),
            snapshots: Arc::new(snapshots),
            bus,
            config,
            locks: KeyedLocks::new(),
        })
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn snapshots(&self) -> &Arc<S> {
        &self.snapshots
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<L, S, B> CommandDispatcher<L, S, B>
where
    L: EventLog + 'static,
    S: SnapshotStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Raw command entry point: `(entity key, command kind, JSON payload)`.
    ///
    /// Decodes the command, dispatches it and encodes the reply as JSON.
    pub async fn dispatch_raw<A>(
        &self,
        key: &str,
        kind: &str,
        payload: JsonValue,
    ) -> Result<JsonValue, DispatchError>
    where
        A: EntityStateMachine<Error = DomainError> + Serialize + DeserializeOwned,
        A::Command: Command,
        A::Event: Event,
        A::Reply: Serialize,
    {
        let key = EntityKey::new(key)?;
        let command = <A::Command as Command>::decode(kind, payload)?;
        let reply = self.dispatch::<A>(&key, command).await?;
        serde_json::to_value(reply).map_err(|e| DispatchError::Encode(e.to_string()))
    }

    /// Dispatch a typed command through the full event-sourcing pipeline.
    pub async fn dispatch<A>(
        &self,
        key: &EntityKey,
        command: A::Command,
    ) -> Result<A::Reply, DispatchError>
    where
        A: EntityStateMachine<Error = DomainError> + Serialize + DeserializeOwned,
        A::Event: Event,
    {
        let span = info_span!("dispatch", entity_type = A::ENTITY_TYPE, entity_key = %key);
        self.dispatch_inner::<A>(key, command).instrument(span).await
    }

    async fn dispatch_inner<A>(
        &self,
        key: &EntityKey,
        command: A::Command,
    ) -> Result<A::Reply, DispatchError>
    where
        A: EntityStateMachine<Error = DomainError> + Serialize + DeserializeOwned,
        A::Event: Event,
    {
        let lock = self.locks.get(key);
        let _guard = lock.lock().await;

        // 1) + 2) Restore current state
        let restored = self.restore::<A>(key).await?;

        // 3) Decide (no mutation)
        let decision = restored.state.handle(&command)?;
        if decision.events.is_empty() {
            debug!(version = restored.version, "read-only command");
            return Ok(decision.reply);
        }

        // 4) Append (atomic, optimistic, bounded)
        let uncommitted = decision
            .events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(A::ENTITY_TYPE, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let append = self
            .log
            .append(key, uncommitted, ExpectedVersion::Exact(restored.version));
        let committed = match tokio::time::timeout(self.config.append_timeout, append).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.config.append_timeout, "append timed out");
                return Err(DispatchError::AppendTimeout(self.config.append_timeout));
            }
        };

        let head = committed
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(restored.version);
        info!(events = committed.len(), head, "command committed");

        // 5) Publish (committed from here on; failures are logged, not returned)
        self.publish(&committed);

        // 6) Snapshot + reply
        self.maybe_snapshot::<A>(key, restored, &decision.events, head)
            .await;
        Ok(decision.reply)
    }

    async fn restore<A>(&self, key: &EntityKey) -> Result<Restored<A>, DispatchError>
    where
        A: EntityStateMachine<Error = DomainError> + DeserializeOwned,
        A::Event: Event,
    {
        let snapshot = self
            .snapshots
            .read_latest_snapshot(key)
            .await
            .map_err(|e| DispatchError::ReplayFailure(format!("snapshot read failed: {e}")))?;

        let (mut state, snapshot_version) = match snapshot {
            Some(snapshot) => match snapshot.restore::<A>() {
                Ok(state) => (state, snapshot.sequence_number),
                Err(e) => {
                    warn!(
                        sequence_number = snapshot.sequence_number,
                        error = %e,
                        "failed to decode snapshot; replaying full stream"
                    );
                    (A::initial_state(key), 0)
                }
            },
            None => (A::initial_state(key), 0),
        };

        // Read from the snapshot's own event so a log behind the snapshot is detected.
        let after = (snapshot_version > 1).then(|| snapshot_version - 1);
        let stream = self
            .log
            .read_since(key, after)
            .await
            .map_err(|e| DispatchError::ReplayFailure(e.to_string()))?;
        let history = match (snapshot_version, stream.first()) {
            (0, _) => &stream[..],
            (_, Some(first)) if first.sequence_number == snapshot_version => &stream[1..],
            _ => {
                return Err(DispatchError::ReplayFailure(format!(
                    "snapshot at sequence {snapshot_version} is ahead of the log"
                )));
            }
        };
        validate_history(key, snapshot_version, history)?;

        for stored in history {
            let event: A::Event = stored
                .decode()
                .map_err(|e| DispatchError::ReplayFailure(e.to_string()))?
                .ok_or_else(|| {
                    DispatchError::ReplayFailure(format!(
                        "unknown event kind '{}' at sequence {}",
                        stored.event_type, stored.sequence_number
                    ))
                })?;
            state = state.apply(&event)?;
        }

        let version = history
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(snapshot_version);
        debug!(snapshot_version, replayed = history.len(), version, "state restored");

        Ok(Restored {
            state,
            version,
            snapshot_version,
        })
    }

    async fn maybe_snapshot<A>(
        &self,
        key: &EntityKey,
        restored: Restored<A>,
        events: &[A::Event],
        head: u64,
    ) where
        A: EntityStateMachine<Error = DomainError> + Serialize,
    {
        if head - restored.snapshot_version < self.config.snapshot_every {
            return;
        }

        let state = match warehouse_core::fold(restored.state, events) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, head, "committed events do not fold; snapshot skipped");
                return;
            }
        };
        let snapshot = match Snapshot::capture(key.clone(), A::ENTITY_TYPE, head, &state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, head, "snapshot capture failed");
                return;
            }
        };

        let store = Arc::clone(&self.snapshots);
        let write = tokio::spawn(async move { store.write_snapshot(snapshot).await });
        match write.await {
            Ok(Ok(())) => info!(sequence_number = head, "snapshot written"),
            Ok(Err(e)) => warn!(error = %e, sequence_number = head, "snapshot write failed"),
            Err(e) => warn!(error = %e, sequence_number = head, "snapshot task failed"),
        }
    }

    fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                // The events are durable; projectors recover them via catch-up.
                warn!(
                    error = ?e,
                    sequence_number = stored.sequence_number,
                    "event publication failed"
                );
                return;
            }
        }
    }
}

/// History must continue right after the snapshot with no gaps, and belong to `key`.
fn validate_history(
    key: &EntityKey,
    snapshot_version: u64,
    history: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut expected = snapshot_version + 1;
    for stored in history {
        if &stored.entity_key != key {
            return Err(DispatchError::ReplayFailure(format!(
                "stream for '{key}' contains an event of '{}' at sequence {}",
                stored.entity_key, stored.sequence_number
            )));
        }
        if stored.sequence_number != expected {
            return Err(DispatchError::ReplayFailure(format!(
                "non-contiguous stream (expected sequence {expected}, found {})",
                stored.sequence_number
            )));
        }
        expected += 1;
    }
    Ok(())
}
