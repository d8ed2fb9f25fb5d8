//! Event batch ingress.
//!
//! Parses a JSON array of events, resolves each event's subscriptions and
//! enqueues one delivery task per subscription. Delivery happens later on
//! the processor; this handler never waits for it.

use std::sync::Arc;

use axum::{
    extract::{rejection::BytesRejection, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use gridlet_core::EventGridEvent;
use gridlet_delivery::DeliveryTask;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{error::ApiError, AppState};

/// Response header echoing `id=count` for every routed event.
pub const EVENT_PROCESSED_HEADER: HeaderName = HeaderName::from_static("event-processed");

/// Routing result for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    /// Event identifier
    pub id: String,
    /// Event type used for routing
    pub event_type: String,
    /// Number of delivery tasks created
    pub subscriptions: usize,
}

/// Response from a successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResponse {
    /// One receipt per event, in batch order
    pub events: Vec<EventReceipt>,
}

/// Accepts a batch of events for fan-out.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: body is not a JSON array of events
/// - 500: body could not be read
#[instrument(name = "receive_events", skip(state, body))]
pub async fn receive_events(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!(error = %rejection, "failed to read event batch body");
            return ApiError::body_unreadable(rejection.body_text()).into_response();
        },
    };

    let events: Vec<EventGridEvent> = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, body_size = body.len(), "rejected malformed event batch");
            return ApiError::malformed_batch(e.to_string()).into_response();
        },
    };

    debug!(batch_size = events.len(), "received event batch");

    let mut receipts = Vec::with_capacity(events.len());
    for event in events {
        receipts.push(route_event(&state, Arc::new(event)).await);
    }

    let mut response = (StatusCode::OK, Json(ReceiveResponse { events: receipts.clone() }))
        .into_response();

    if let Some(value) = processed_header(&receipts) {
        response.headers_mut().insert(EVENT_PROCESSED_HEADER, value);
    }

    response
}

async fn route_event(state: &AppState, event: Arc<EventGridEvent>) -> EventReceipt {
    let subscriptions = state.registry.subscriptions_for(&event.event_type).unwrap_or_default();

    state.archive.record_received(&event, subscriptions).await;

    if subscriptions.is_empty() {
        error!(
            event_id = %event.id,
            event_type = %event.event_type,
            "no subscribers for event type, event dropped"
        );
    } else {
        let received_at = state.clock.now();
        for subscription in subscriptions {
            state.queue.enqueue(DeliveryTask::new(
                Arc::clone(&event),
                Arc::clone(subscription),
                received_at,
            ));
        }
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            subscriptions = subscriptions.len(),
            "event queued for delivery"
        );
    }

    EventReceipt {
        id: event.id.clone(),
        event_type: event.event_type.clone(),
        subscriptions: subscriptions.len(),
    }
}

/// Renders receipts as `id=count` pairs, or `None` if the result is not a
/// valid header value.
fn processed_header(receipts: &[EventReceipt]) -> Option<HeaderValue> {
    if receipts.is_empty() {
        return None;
    }

    let rendered = receipts
        .iter()
        .map(|receipt| format!("{}={}", receipt.id, receipt.subscriptions))
        .collect::<Vec<_>>()
        .join(",");

    HeaderValue::from_str(&rendered).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(id: &str, subscriptions: usize) -> EventReceipt {
        EventReceipt { id: id.to_string(), event_type: "Foo".to_string(), subscriptions }
    }

    #[test]
    fn processed_header_joins_pairs() {
        let value = processed_header(&[receipt("a", 2), receipt("b", 0)]).unwrap();
        assert_eq!(value, "a=2,b=0");
    }

    #[test]
    fn processed_header_skips_unrepresentable_ids() {
        assert!(processed_header(&[receipt("line\nbreak", 1)]).is_none());
        assert!(processed_header(&[]).is_none());
    }
}
