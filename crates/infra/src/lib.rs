//! Infrastructure layer: event log, snapshots, command dispatch, projections.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
mod key_lock;
pub mod projections;
pub mod read_model;
pub mod snapshot_store;
pub mod workers;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, RuntimeConfig};
