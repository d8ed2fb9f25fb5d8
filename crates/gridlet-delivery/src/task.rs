//! Unit of delivery work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridlet_core::{EventGridEvent, Subscription};

/// One pending delivery of one event to one subscription.
///
/// Tasks are values: a retry builds a new task with the next attempt number
/// rather than mutating the failed one. Event and subscription are shared
/// with every other task fanned out from the same batch.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    /// Event to deliver.
    pub event: Arc<EventGridEvent>,
    /// Destination.
    pub subscription: Arc<Subscription>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// When the receiver accepted the event.
    pub first_received_at: DateTime<Utc>,
}

impl DeliveryTask {
    /// Creates the first attempt for an event and subscription.
    pub fn new(
        event: Arc<EventGridEvent>,
        subscription: Arc<Subscription>,
        first_received_at: DateTime<Utc>,
    ) -> Self {
        Self { event, subscription, attempt: 1, first_received_at }
    }

    /// Returns the task for the following attempt.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            subscription: Arc::clone(&self.subscription),
            attempt: self.attempt.saturating_add(1),
            first_received_at: self.first_received_at,
        }
    }
}
