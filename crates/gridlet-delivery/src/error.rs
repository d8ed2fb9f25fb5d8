//! Error types for delivery attempts and queue access.
//!
//! Every error is classified either as a transport failure, which the
//! processor retries, or as a terminal failure, which goes straight to the
//! deadletter queue.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while delivering an event or accessing the queue.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection to the subscriber failed or broke mid-request.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Subscriber answered with a non-success status.
    #[error("subscriber responded with HTTP {status_code}")]
    HttpStatus {
        /// Response status code
        status_code: u16,
        /// Response body content, possibly truncated
        body: String,
    },

    /// Event could not be encoded as a request body.
    #[error("event serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// Destination URL or HTTP client cannot be built.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Delivery queue lock is poisoned.
    #[error("delivery queue unavailable: {message}")]
    QueueUnavailable {
        /// Description of the fault
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error from a non-success HTTP response.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a queue fault.
    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self::QueueUnavailable { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns true if the failure happened on the wire and is worth
    /// retrying.
    ///
    /// Any non-success status counts, 4xx included: a local subscriber
    /// returning 404 is usually just not started yet.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => true,

            Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::QueueUnavailable { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Returns the HTTP status if the subscriber responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of delivery error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and other unexpected statuses.
    Server,
    /// Encoding failures.
    Serialization,
    /// Configuration problems.
    Configuration,
    /// Queue and internal faults.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::HttpStatus { status_code, .. } if (400..500).contains(status_code) => {
                Self::Client
            },
            DeliveryError::HttpStatus { .. } => Self::Server,
            DeliveryError::Serialization { .. } => Self::Serialization,
            DeliveryError::Configuration { .. } => Self::Configuration,
            DeliveryError::QueueUnavailable { .. } | DeliveryError::Internal { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Serialization => write!(f, "serialization"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_transport());
        assert!(DeliveryError::timeout(30).is_transport());
        assert!(DeliveryError::http_status(500, "boom").is_transport());
        assert!(DeliveryError::http_status(404, "not found").is_transport());

        assert!(!DeliveryError::serialization("bad float").is_transport());
        assert!(!DeliveryError::configuration("invalid URL").is_transport());
        assert!(!DeliveryError::queue_unavailable("poisoned").is_transport());
        assert!(!DeliveryError::internal("oops").is_transport());
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("test")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::http_status(400, "bad request")),
            ErrorCategory::Client
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::http_status(503, "unavailable")),
            ErrorCategory::Server
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::serialization("x")),
            ErrorCategory::Serialization
        );
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::http_status(503, "").to_string(),
            "subscriber responded with HTTP 503"
        );
        assert_eq!(DeliveryError::http_status(503, "").status_code(), Some(503));
    }
}
