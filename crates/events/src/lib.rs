//! `shipyard-events`: event values and their delivery to subscribers.
//!
//! Emission is decoupled from persistence: callers persist first, then emit.
//! Nothing here touches storage.

pub mod broker;
pub mod emitter;
pub mod event;
pub mod fanout;
pub mod in_memory_broker;
pub mod noop;

pub use broker::{Broker, BrokerChannel, BrokerError, Delivery, Exchange, ExchangeOf, Subscription};
pub use emitter::{EmitError, EventEmitter};
pub use event::{Event, ProjectCreated, ProjectDeleted, ProjectUpdated};
pub use fanout::FanoutEventEmitter;
pub use in_memory_broker::{BrokerFault, InMemoryBroker, InMemoryChannel, InMemoryExchange};
pub use noop::{NoopEventEmitter, RecordedEvent};
