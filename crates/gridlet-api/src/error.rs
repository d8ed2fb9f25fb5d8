//! HTTP-facing error type and JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not JSON, or not an array of events.
    #[error("malformed event batch: {message}")]
    MalformedBatch {
        /// Decoder error message
        message: String,
    },

    /// Request body could not be read.
    #[error("failed to read request body: {message}")]
    BodyUnreadable {
        /// Transport error message
        message: String,
    },
}

impl ApiError {
    /// Creates a malformed batch error.
    pub fn malformed_batch(message: impl Into<String>) -> Self {
        Self::MalformedBatch { message: message.into() }
    }

    /// Creates a body read error.
    pub fn body_unreadable(message: impl Into<String>) -> Self {
        Self::BodyUnreadable { message: message.into() }
    }

    /// Returns the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedBatch { .. } => "E1001",
            Self::BodyUnreadable { .. } => "E1002",
        }
    }

    /// Returns the HTTP status the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedBatch { .. } => StatusCode::BAD_REQUEST,
            Self::BodyUnreadable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response with code and message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code (E1001-E1002)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail { code: self.code().to_string(), message: self.to_string() },
        };
        (self.status_code(), Json(body)).into_response()
    }
}
