//! Identity and health endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{AppState, APP_NAME};

/// Identity object served at `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// Application name
    pub app: String,
}

/// Health check response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Delivery tasks waiting in the queue
    pub queue_depth: usize,
    /// Number of routed event types
    pub event_types: usize,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting and delivering events
    Healthy,
}

/// Returns the application identity.
#[instrument(name = "identity", skip_all)]
pub async fn identity() -> Json<IdentityResponse> {
    Json(IdentityResponse { app: APP_NAME.to_string() })
}

/// Health check endpoint handler.
///
/// Cheap enough to poll: reads the queue length and registry size only.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        timestamp: state.clock.now(),
        queue_depth: state.queue.len(),
        event_types: state.registry.len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    debug!(queue_depth = response.queue_depth, "health check completed");

    (StatusCode::OK, Json(response)).into_response()
}
