//! Read model storage abstractions.

pub mod view_store;

pub use view_store::{InMemoryViewStore, ViewRecord, ViewStore, ViewStoreError};
