//! gridlet HTTP API.
//!
//! Hosts the event receiver, the identity and health endpoints, and the
//! layered service configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use gridlet_core::{Archive, Clock, SubscriptionRegistry};
use gridlet_delivery::DeliveryQueue;

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::{Config, StorageConfig};
pub use error::ApiError;
pub use server::{create_router, shutdown_signal, start_server};

/// Application name reported by the identity endpoint and the `App` header.
pub const APP_NAME: &str = "gridlet";

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event type routing table
    pub registry: Arc<SubscriptionRegistry>,
    /// Queue the receiver feeds
    pub queue: DeliveryQueue,
    /// Best-effort record of received events
    pub archive: Archive,
    /// Source of received timestamps
    pub clock: Arc<dyn Clock>,
}
