//! Domain events and the notification bus they travel on.
//!
//! Aggregates emit typed events; once the owning transaction commits, the
//! engine wraps them in [`EventEnvelope`]s and publishes them on an
//! [`EventBus`]. Delivery is best-effort and never part of the transactional
//! guarantee.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
