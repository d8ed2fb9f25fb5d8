//! HTTP client delivering events to subscriber endpoints.
//!
//! Resolves a subscription to its destination URL, posts the event as a
//! one-element JSON array and classifies the result into a
//! [`DeliveryOutcome`] the processor can act on.

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use gridlet_core::{EventGridEvent, Receiver, Subscription, FUNCTION_TRIGGER_PATH};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Url,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Header telling the subscriber what kind of request this is.
pub const EVENT_TYPE_HEADER: &str = "aeg-event-type";

/// Value of [`EVENT_TYPE_HEADER`] for event notifications.
pub const NOTIFICATION: &str = "Notification";

/// Response bodies longer than this are truncated in error messages.
const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a whole request, connect through response.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("gridlet/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Subscriber accepted the event with a 2xx status.
    Delivered {
        /// Response status code
        status_code: u16,
        /// Time from sending to receiving the response
        duration: Duration,
    },
    /// Failure on the wire; worth retrying.
    TransportFailure(DeliveryError),
    /// Failure before anything was sent; retrying cannot help.
    OtherFailure(DeliveryError),
}

impl DeliveryOutcome {
    /// Returns true for [`DeliveryOutcome::Delivered`].
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

impl From<DeliveryError> for DeliveryOutcome {
    fn from(error: DeliveryError) -> Self {
        if error.is_transport() {
            Self::TransportFailure(error)
        } else {
            Self::OtherFailure(error)
        }
    }
}

/// Performs one delivery attempt of one event to one subscription.
#[async_trait]
pub trait EventSender: Send + Sync + fmt::Debug {
    /// Sends the event and reports what happened.
    async fn send(&self, subscription: &Subscription, event: &EventGridEvent) -> DeliveryOutcome;
}

/// Resolves where a subscription receives its events.
///
/// # Errors
///
/// Returns `DeliveryError::Configuration` if the joined address does not
/// parse as a URL.
///
/// # Example
///
/// ```
/// use gridlet_core::{Endpoint, Service, Subscription};
/// use gridlet_delivery::client::destination_url;
///
/// let service = Service::new(
///     "http://localhost:7071/",
///     vec![Endpoint::function("OnOrder", ["Order.Created"]).unwrap()],
/// )
/// .unwrap();
/// let subscription = Subscription::new(&service, &service.endpoints()[0]);
///
/// assert_eq!(
///     destination_url(&subscription).unwrap().as_str(),
///     "http://localhost:7071/runtime/webhooks/eventgrid?functionName=OnOrder"
/// );
/// ```
pub fn destination_url(subscription: &Subscription) -> Result<Url> {
    let base = subscription.base_address().trim_end_matches('/');

    let joined = match subscription.receiver() {
        Receiver::Path(path) => format!("{base}/{}", path.trim_start_matches('/')),
        Receiver::Function(_) => format!("{base}/{FUNCTION_TRIGGER_PATH}"),
    };

    let mut url = Url::parse(&joined).map_err(|e| {
        DeliveryError::configuration(format!("invalid destination URL '{joined}': {e}"))
    })?;

    if let Receiver::Function(name) = subscription.receiver() {
        url.query_pairs_mut().append_pair("functionName", name);
    }

    Ok(url)
}

/// HTTP implementation of [`EventSender`].
///
/// Keeps one pooled `reqwest::Client` per subscriber base address, built on
/// first use. Every client sends the notification header by default.
#[derive(Debug)]
pub struct EventGridClient {
    config: ClientConfig,
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl EventGridClient {
    /// Creates a client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config, clients: RwLock::new(HashMap::new()) }
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ClientConfig::default())
    }

    /// Returns the number of cached per-service clients.
    pub async fn cached_clients(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn client_for(&self, base_address: &str) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.read().await.get(base_address) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(base_address) {
            return Ok(client.clone());
        }

        let client = self.build_client()?;
        debug!(base_address, "created HTTP client for subscriber service");
        clients.insert(base_address.to_string(), client.clone());
        Ok(client)
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_TYPE_HEADER, HeaderValue::from_static(NOTIFICATION));

        reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        event: &EventGridEvent,
    ) -> Result<(u16, Duration)> {
        let url = destination_url(subscription)?;
        let body = serde_json::to_vec(&[event])
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;
        let client = self.client_for(subscription.base_address()).await?;

        let start_time = std::time::Instant::now();
        let response = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify_request_error(&e))?;
        let duration = start_time.elapsed();

        let status = response.status();
        debug!(status = status.as_u16(), duration_ms = duration.as_millis(), "received response");

        if status.is_success() {
            return Ok((status.as_u16(), duration));
        }

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_ERROR_BODY_SIZE => {
                format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..MAX_ERROR_BODY_SIZE]))
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        Err(DeliveryError::http_status(status.as_u16(), body))
    }

    fn classify_request_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::timeout(self.config.timeout.as_secs())
        } else if error.is_builder() {
            DeliveryError::configuration(format!("failed to build request: {error}"))
        } else if error.is_connect() {
            DeliveryError::network(format!("connection failed: {error}"))
        } else {
            DeliveryError::network(error.to_string())
        }
    }
}

#[async_trait]
impl EventSender for EventGridClient {
    async fn send(&self, subscription: &Subscription, event: &EventGridEvent) -> DeliveryOutcome {
        let span = info_span!(
            "event_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            subscription = %subscription,
        );

        async move {
            match self.deliver(subscription, event).await {
                Ok((status_code, duration)) => DeliveryOutcome::Delivered { status_code, duration },
                Err(error) => {
                    warn!(error = %error, "delivery attempt failed");
                    DeliveryOutcome::from(error)
                },
            }
        }
        .instrument(span)
        .await
    }
}
