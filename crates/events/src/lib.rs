//! Event-sourcing mechanics shared by domain modules and infrastructure:
//! event/command contracts, envelopes, projections and the event bus.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use bus::{EventBus, Subscription};
pub use command::{Command, CommandDecodeError, execute};
pub use envelope::EventEnvelope;
pub use event::{Event, EventDecodeError};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::{FoldError, Projection};
