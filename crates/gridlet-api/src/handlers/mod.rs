//! HTTP request handlers for the gridlet API.
//!
//! - `receive` - event batch ingress
//! - `health` - identity and health endpoints
//!
//! Error responses share one JSON shape, `{"error": {"code", "message"}}`,
//! produced by [`ApiError`](crate::error::ApiError).

pub mod health;
pub mod receive;

pub use health::{health_check, identity};
pub use receive::receive_events;
