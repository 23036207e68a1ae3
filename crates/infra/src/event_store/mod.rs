//! Append-only event log boundary.
//!
//! The durable log is an external collaborator; this module defines the
//! contract the runtime relies on plus an in-memory implementation for
//! tests/dev.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventLog;
pub use r#trait::{EventLog, EventLogError, StoredEvent, UncommittedEvent};
