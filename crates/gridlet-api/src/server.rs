//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. `App` response header
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server stops accepting connections when the shared cancellation
//! token fires, then drains in-flight requests.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{handlers, AppState, APP_NAME};

/// Header identifying the application on every response.
pub const APP_HEADER: HeaderName = HeaderName::from_static("app");

/// Creates the router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use gridlet_api::{create_router, AppState};
/// use gridlet_core::{Archive, RealClock, SubscriptionRegistry};
/// use gridlet_delivery::DeliveryQueue;
///
/// let state = AppState {
///     registry: Arc::new(SubscriptionRegistry::build(&[])),
///     queue: DeliveryQueue::new(),
///     archive: Archive::disabled(),
///     clock: Arc::new(RealClock::new()),
/// };
/// let app = create_router(state, "/api/events", Duration::from_secs(30));
/// ```
pub fn create_router(state: AppState, events_path: &str, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(handlers::identity))
        .route("/health", get(handlers::health_check))
        .route(events_path, post(handlers::receive_events))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_app_header))
        .with_state(state)
}

/// Middleware adding the `App` header to every response.
async fn inject_app_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(APP_HEADER, HeaderValue::from_static(APP_NAME));
    response
}

/// Serves the router until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    app: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
