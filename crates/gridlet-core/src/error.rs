//! Error types for configuration validation and message sinks.
//!
//! Configuration errors surface once at startup and stop the process.
//! Sink errors never stop anything: the [`Archive`](crate::sink::Archive)
//! wrapper logs and swallows them.

use thiserror::Error;

use crate::sink::QueueKind;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Endpoint must name exactly one receiver and at least one event type.
    #[error("invalid endpoint configuration: {message}")]
    InvalidEndpoint {
        /// What is wrong with the endpoint
        message: String,
    },

    /// Service base address or endpoint list is unusable.
    #[error("invalid service configuration for '{base_address}': {message}")]
    InvalidService {
        /// Base address as configured
        base_address: String,
        /// What is wrong with the service
        message: String,
    },
}

impl CoreError {
    /// Creates an endpoint validation error.
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint { message: message.into() }
    }

    /// Creates a service validation error.
    pub fn invalid_service(base_address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidService { base_address: base_address.into(), message: message.into() }
    }
}

/// Errors reported by a [`MessageSink`](crate::sink::MessageSink).
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink is configured but cannot accept messages right now.
    #[error("message sink unavailable for {queue} queue")]
    Unavailable {
        /// Queue the message was meant for
        queue: QueueKind,
    },

    /// Writing the message failed.
    #[error("message sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The message body could not be encoded.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
