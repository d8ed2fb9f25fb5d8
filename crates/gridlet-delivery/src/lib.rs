//! Event delivery engine with retry and deadlettering.
//!
//! Receivers push [`DeliveryTask`]s onto a shared [`DeliveryQueue`]; one
//! [`DeliveryProcessor`] drains it, hands each task to an [`EventSender`]
//! and decides what happens next based on the [`DeliveryOutcome`]:
//!
//! 1. **Delivered** - done
//! 2. **Transport failure** - a retry unit requeues the next attempt after
//!    an exponential backoff, until the attempt limit is reached
//! 3. **Other failure** - deadlettered immediately
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use gridlet_core::{Archive, RealClock};
//! use gridlet_delivery::{
//!     DeliveryProcessor, DeliveryQueue, EventGridClient, ProcessorConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> gridlet_delivery::Result<()> {
//! let queue = DeliveryQueue::new();
//! let processor = DeliveryProcessor::new(
//!     queue.clone(),
//!     Arc::new(EventGridClient::with_defaults()),
//!     Archive::disabled(),
//!     Arc::new(RealClock::new()),
//!     ProcessorConfig::default(),
//!     CancellationToken::new(),
//! );
//!
//! let handle = processor.spawn();
//! handle.shutdown(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod task;

pub use client::{ClientConfig, DeliveryOutcome, EventGridClient, EventSender};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use processor::{
    DeliveryProcessor, ProcessorConfig, ProcessorHandle, ProcessorStats, TaskResolution,
};
pub use queue::DeliveryQueue;
pub use retry::{backoff, RetryDecision, RetryPolicy};
pub use task::DeliveryTask;
