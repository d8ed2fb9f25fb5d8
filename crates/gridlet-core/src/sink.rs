//! Append-only message sinks for received and deadlettered events.
//!
//! A [`MessageSink`] stands in for an external queue store with two logical
//! queues. Writes are best-effort: the [`Archive`] wrapper used by the
//! receiver and the delivery processor logs sink failures and carries on, so
//! a broken sink never affects routing or delivery.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use gridlet_core::sink::{Archive, InMemorySink, QueueKind};
//!
//! # tokio_test_block(async {
//! let sink = Arc::new(InMemorySink::new());
//! let archive = Archive::new(sink.clone());
//! # let event: gridlet_core::EventGridEvent = serde_json::from_str(
//! #     r#"{"id":"1","eventType":"Foo","subject":"s","data":{},
//! #         "eventTime":"2024-01-01T00:00:00Z","dataVersion":"1"}"#).unwrap();
//! archive.record_received(&event, &[]).await;
//! assert_eq!(sink.messages(QueueKind::Received).len(), 1);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::SinkError,
    models::{EventGridEvent, Subscription},
};

/// Default name of the queue holding received events.
pub const DEFAULT_RECEIVED_QUEUE: &str = "gridlet-received";

/// Default name of the queue holding deadlettered events.
pub const DEFAULT_DEADLETTER_QUEUE: &str = "gridlet-deadletter";

/// Logical queue a message is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Every inbound event with the subscriptions it was routed to.
    Received,
    /// Events that reached a terminal delivery failure.
    Deadletter,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Deadletter => write!(f, "deadletter"),
        }
    }
}

/// Physical queue names for both logical queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    /// Name of the received queue
    pub received: String,
    /// Name of the deadletter queue
    pub deadletter: String,
}

impl QueueNames {
    /// Returns the physical name for a logical queue.
    pub fn name(&self, queue: QueueKind) -> &str {
        match queue {
            QueueKind::Received => &self.received,
            QueueKind::Deadletter => &self.deadletter,
        }
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            received: DEFAULT_RECEIVED_QUEUE.to_string(),
            deadletter: DEFAULT_DEADLETTER_QUEUE.to_string(),
        }
    }
}

/// Identifier assigned to a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message as stored by a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Identifier assigned at insertion
    pub message_id: MessageId,
    /// When the sink accepted the message
    pub inserted_at: DateTime<Utc>,
    /// Message body
    pub body: serde_json::Value,
}

impl StoredMessage {
    fn new(body: serde_json::Value) -> Self {
        Self { message_id: MessageId::new(), inserted_at: Utc::now(), body }
    }
}

/// Append-only store with a received queue and a deadletter queue.
#[async_trait]
pub trait MessageSink: Send + Sync + fmt::Debug {
    /// Appends a message to the given queue.
    ///
    /// Returns the stored message's ID, or `None` if the sink discards
    /// messages.
    async fn enqueue(
        &self,
        queue: QueueKind,
        body: serde_json::Value,
    ) -> Result<Option<MessageId>, SinkError>;
}

/// Sink used when storage is disabled. Accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl NoOpSink {
    /// Creates a new no-op sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageSink for NoOpSink {
    async fn enqueue(
        &self,
        _queue: QueueKind,
        _body: serde_json::Value,
    ) -> Result<Option<MessageId>, SinkError> {
        Ok(None)
    }
}

/// Sink that keeps messages in memory for inspection.
///
/// Can be switched unavailable to exercise failure paths.
#[derive(Debug)]
pub struct InMemorySink {
    messages: Mutex<Vec<(QueueKind, StoredMessage)>>,
    available: AtomicBool,
}

impl InMemorySink {
    /// Creates an empty, available sink.
    pub fn new() -> Self {
        Self { messages: Mutex::new(Vec::new()), available: AtomicBool::new(true) }
    }

    /// Makes subsequent writes succeed or fail with `SinkError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the bodies written to a queue, oldest first.
    pub fn messages(&self, queue: QueueKind) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|(kind, _)| *kind == queue)
                    .map(|(_, message)| message.body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of messages across both queues.
    pub fn total(&self) -> usize {
        self.messages.lock().map(|messages| messages.len()).unwrap_or(0)
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for InMemorySink {
    async fn enqueue(
        &self,
        queue: QueueKind,
        body: serde_json::Value,
    ) -> Result<Option<MessageId>, SinkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable { queue });
        }

        let message = StoredMessage::new(body);
        let id = message.message_id;
        self.messages.lock().map_err(|_| SinkError::Unavailable { queue })?.push((queue, message));
        Ok(Some(id))
    }
}

/// Sink appending one JSON message per line to `<directory>/<queue>.jsonl`.
#[derive(Debug)]
pub struct JsonLinesSink {
    directory: PathBuf,
    names: QueueNames,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesSink {
    /// Creates the sink, creating `directory` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Io` if the directory cannot be created.
    pub async fn create(
        directory: impl Into<PathBuf>,
        names: QueueNames,
    ) -> Result<Self, SinkError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory, names, write_lock: tokio::sync::Mutex::new(()) })
    }

    /// Returns the file backing a queue.
    pub fn queue_path(&self, queue: QueueKind) -> PathBuf {
        self.directory.join(format!("{}.jsonl", self.names.name(queue)))
    }

    /// Returns the directory holding the queue files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl MessageSink for JsonLinesSink {
    async fn enqueue(
        &self,
        queue: QueueKind,
        body: serde_json::Value,
    ) -> Result<Option<MessageId>, SinkError> {
        let message = StoredMessage::new(body);
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        // Whole lines only; concurrent appends must not interleave.
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.queue_path(queue))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(Some(message.message_id))
    }
}

/// Body written to the received queue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedRecord<'a> {
    /// Event as received
    pub event: &'a EventGridEvent,
    /// Display form of every subscription the event was routed to
    pub subscriptions: Vec<String>,
}

/// Body written to the deadletter queue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadletterRecord<'a> {
    /// Event that could not be delivered
    pub event: &'a EventGridEvent,
    /// Why delivery stopped
    pub reason: String,
    /// Display form of the subscription
    pub subscription: String,
    /// Attempt number of the final failure
    pub attempt: u32,
    /// When the event was first received
    pub first_received_timestamp: DateTime<Utc>,
}

/// Best-effort writer over a [`MessageSink`].
#[derive(Debug, Clone)]
pub struct Archive {
    sink: Arc<dyn MessageSink>,
}

impl Archive {
    /// Wraps a sink.
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Creates an archive that discards everything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoOpSink::new()))
    }

    /// Records an inbound event and where it was routed.
    pub async fn record_received(&self, event: &EventGridEvent, subscriptions: &[Arc<Subscription>]) {
        let record = ReceivedRecord {
            event,
            subscriptions: subscriptions.iter().map(ToString::to_string).collect(),
        };
        self.write(QueueKind::Received, &event.id, &record).await;
    }

    /// Records a terminal delivery failure.
    pub async fn record_deadletter(&self, record: &DeadletterRecord<'_>) {
        self.write(QueueKind::Deadletter, &record.event.id, record).await;
    }

    async fn write(&self, queue: QueueKind, event_id: &str, record: &impl Serialize) {
        let body = match serde_json::to_value(record) {
            Ok(body) => body,
            Err(error) => {
                warn!(event_id, queue = %queue, error = %error, "failed to encode sink record");
                return;
            },
        };

        match self.sink.enqueue(queue, body).await {
            Ok(Some(message_id)) => {
                debug!(event_id, queue = %queue, message_id = %message_id, "archived event");
            },
            Ok(None) => {},
            Err(error) => {
                warn!(event_id, queue = %queue, error = %error, "failed to write to message sink");
            },
        }
    }
}
