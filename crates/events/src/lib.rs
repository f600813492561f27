//! Ledger notices: the event trait, session-scoped envelopes and the bus that
//! fans them out to views.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Scoped, Subscription};
pub use envelope::{EventEnvelope, SessionId};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
