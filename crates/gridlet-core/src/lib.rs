//! Core domain model for the gridlet event-routing emulator.
//!
//! Provides the event envelope, subscriber configuration types, the
//! subscription registry that drives fan-out, the clock abstraction used for
//! all timing, and the message sinks that archive received and deadlettered
//! events. The delivery and API crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod registry;
pub mod sink;
pub mod time;

pub use error::{CoreError, Result, SinkError};
pub use models::{
    Endpoint, EndpointConfig, EventGridEvent, Receiver, Service, ServiceConfig, Subscription,
    FUNCTION_TRIGGER_PATH,
};
pub use registry::SubscriptionRegistry;
pub use sink::{
    Archive, DeadletterRecord, InMemorySink, JsonLinesSink, MessageId, MessageSink, NoOpSink,
    QueueKind, QueueNames,
};
pub use time::{Clock, RealClock, TestClock};
