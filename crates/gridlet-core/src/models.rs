//! Event schema and subscriber configuration models.
//!
//! Defines the inbound event envelope, the subscriber topology (services
//! owning endpoints) and the resolved [`Subscription`] that the delivery
//! pipeline addresses. Configuration types validate themselves on
//! deserialization so the rest of the system only ever sees usable values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Trigger path a local functions host exposes for event-triggered functions.
///
/// The function name is passed as the `functionName` query parameter.
pub const FUNCTION_TRIGGER_PATH: &str = "runtime/webhooks/eventgrid";

/// Prefix used when rendering function receivers in logs and sink records.
const FUNCTION_DISPLAY_PREFIX: &str = "EventGridFunc:";

/// Event envelope in the event grid schema.
///
/// Field names are camelCase on the wire, both inbound and outbound.
///
/// # Example
///
/// ```
/// use gridlet_core::models::EventGridEvent;
///
/// let event: EventGridEvent = serde_json::from_str(
///     r#"{"id":"1","eventType":"Foo","subject":"s","data":{},
///         "eventTime":"2024-01-01T00:00:00Z","dataVersion":"1"}"#,
/// )
/// .unwrap();
/// assert_eq!(event.event_type, "Foo");
/// assert!(event.topic.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    /// Publisher-assigned identifier, unique per publisher.
    #[serde(alias = "Id")]
    pub id: String,
    /// Routing key matched against subscriber event types.
    #[serde(alias = "EventType")]
    pub event_type: String,
    /// Publisher-defined path to the event subject.
    #[serde(alias = "Subject")]
    pub subject: String,
    /// Arbitrary event payload.
    #[serde(alias = "Data")]
    pub data: serde_json::Value,
    /// When the publisher generated the event.
    #[serde(alias = "EventTime")]
    pub event_time: DateTime<Utc>,
    /// Schema version of `data`.
    #[serde(alias = "DataVersion")]
    pub data_version: String,
    /// Source topic, filled in by the real service.
    #[serde(default, alias = "Topic", skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Schema version of the envelope.
    #[serde(default, alias = "MetadataVersion", skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
}

/// Where an endpoint receives its events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Receiver {
    /// Relative path appended to the service base address.
    Path(String),
    /// Function name addressed through [`FUNCTION_TRIGGER_PATH`].
    Function(String),
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.trim_start_matches('/')),
            Self::Function(name) => write!(f, "{FUNCTION_DISPLAY_PREFIX}{name}"),
        }
    }
}

/// Endpoint as written in configuration files.
///
/// Exactly one of `path` and `event_grid_function` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Relative receiver path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Function name for the local trigger URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_grid_function: Option<String>,
    /// Event types delivered to this endpoint.
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Validated subscriber endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EndpointConfig", into = "EndpointConfig")]
pub struct Endpoint {
    receiver: Receiver,
    event_types: Vec<String>,
}

impl Endpoint {
    /// Creates an endpoint receiving on a relative path.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEndpoint` if the path or event type list
    /// is empty.
    pub fn path<I, S>(path: impl Into<String>, event_types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Receiver::Path(path.into()), event_types)
    }

    /// Creates an endpoint addressed by function name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEndpoint` if the name or event type list
    /// is empty.
    pub fn function<I, S>(name: impl Into<String>, event_types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Receiver::Function(name.into()), event_types)
    }

    fn new<I, S>(receiver: Receiver, event_types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event_types: Vec<String> = event_types.into_iter().map(Into::into).collect();

        match &receiver {
            Receiver::Path(path) if path.trim().is_empty() => {
                return Err(CoreError::invalid_endpoint("path must not be empty"));
            },
            Receiver::Function(name) if name.trim().is_empty() => {
                return Err(CoreError::invalid_endpoint("function name must not be empty"));
            },
            _ => {},
        }

        if event_types.is_empty() {
            return Err(CoreError::invalid_endpoint(format!(
                "endpoint '{receiver}' subscribes to no event types"
            )));
        }

        if event_types.iter().any(|event_type| event_type.trim().is_empty()) {
            return Err(CoreError::invalid_endpoint(format!(
                "endpoint '{receiver}' lists an empty event type"
            )));
        }

        Ok(Self { receiver, event_types })
    }

    /// Returns where this endpoint receives events.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Returns the subscribed event types in configuration order.
    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }
}

impl TryFrom<EndpointConfig> for Endpoint {
    type Error = CoreError;

    fn try_from(config: EndpointConfig) -> Result<Self> {
        let receiver = match (config.path, config.event_grid_function) {
            (Some(path), None) => Receiver::Path(path),
            (None, Some(name)) => Receiver::Function(name),
            (Some(_), Some(_)) => {
                return Err(CoreError::invalid_endpoint(
                    "set either path or event_grid_function, not both",
                ));
            },
            (None, None) => {
                return Err(CoreError::invalid_endpoint(
                    "one of path or event_grid_function is required",
                ));
            },
        };

        Self::new(receiver, config.event_types)
    }
}

impl From<Endpoint> for EndpointConfig {
    fn from(endpoint: Endpoint) -> Self {
        let (path, event_grid_function) = match endpoint.receiver {
            Receiver::Path(path) => (Some(path), None),
            Receiver::Function(name) => (None, Some(name)),
        };
        Self { path, event_grid_function, event_types: endpoint.event_types }
    }
}

/// Service as written in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Absolute `http` or `https` address of the subscriber application.
    pub base_address: String,
    /// Endpoints owned by the application.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// Validated subscriber application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ServiceConfig", into = "ServiceConfig")]
pub struct Service {
    base_address: String,
    endpoints: Vec<Endpoint>,
}

impl Service {
    /// Creates a service from its base address and endpoints.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidService` if the base address is not an
    /// absolute `http`/`https` address or the service has no endpoints.
    pub fn new(base_address: impl Into<String>, endpoints: Vec<Endpoint>) -> Result<Self> {
        let base_address = base_address.into();

        let host = base_address
            .strip_prefix("http://")
            .or_else(|| base_address.strip_prefix("https://"))
            .ok_or_else(|| {
                CoreError::invalid_service(&base_address, "base address must use http or https")
            })?;

        if host.trim_matches('/').is_empty() {
            return Err(CoreError::invalid_service(&base_address, "base address has no host"));
        }

        if endpoints.is_empty() {
            return Err(CoreError::invalid_service(&base_address, "service has no endpoints"));
        }

        Ok(Self { base_address, endpoints })
    }

    /// Returns the base address as configured.
    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    /// Returns the endpoints in configuration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

impl TryFrom<ServiceConfig> for Service {
    type Error = CoreError;

    fn try_from(config: ServiceConfig) -> Result<Self> {
        Self::new(config.base_address, config.endpoints)
    }
}

impl From<Service> for ServiceConfig {
    fn from(service: Service) -> Self {
        Self { base_address: service.base_address, endpoints: service.endpoints }
    }
}

/// One concrete delivery destination: an endpoint of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    base_address: String,
    receiver: Receiver,
}

impl Subscription {
    /// Resolves an endpoint against the service that owns it.
    pub fn new(service: &Service, endpoint: &Endpoint) -> Self {
        Self {
            base_address: service.base_address().to_string(),
            receiver: endpoint.receiver().clone(),
        }
    }

    /// Returns the owning service's base address.
    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    /// Returns the endpoint receiver.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_address.trim_end_matches('/'), self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_accepts_pascal_case_properties() {
        let event: EventGridEvent = serde_json::from_value(serde_json::json!({
            "Id": "evt-1",
            "EventType": "Foo",
            "Subject": "orders/1",
            "Data": { "n": 1 },
            "EventTime": "2024-01-01T00:00:00Z",
            "DataVersion": "1",
            "Topic": "/local"
        }))
        .unwrap();

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.event_type, "Foo");
        assert_eq!(event.topic.as_deref(), Some("/local"));

        let serialized = serde_json::to_value(&event).unwrap();
        assert_eq!(serialized["eventType"], "Foo");
        assert!(serialized.get("EventType").is_none());
    }

    #[test]
    fn endpoint_requires_exactly_one_receiver() {
        let both = EndpointConfig {
            path: Some("/hook".into()),
            event_grid_function: Some("OnFoo".into()),
            event_types: vec!["Foo".into()],
        };
        assert!(Endpoint::try_from(both).is_err());

        let neither = EndpointConfig { event_types: vec!["Foo".into()], ..Default::default() };
        assert!(Endpoint::try_from(neither).is_err());
    }

    #[test]
    fn endpoint_requires_event_types() {
        let error = Endpoint::path("/hook", Vec::<String>::new()).unwrap_err();
        assert!(error.to_string().contains("no event types"));
    }

    #[test]
    fn service_rejects_non_http_base_address() {
        let endpoint = Endpoint::path("/hook", ["Foo"]).unwrap();

        assert!(Service::new("localhost:7071", vec![endpoint.clone()]).is_err());
        assert!(Service::new("http://", vec![endpoint.clone()]).is_err());
        assert!(Service::new("http://localhost:7071", vec![]).is_err());
        assert!(Service::new("https://localhost:7071", vec![endpoint]).is_ok());
    }

    #[test]
    fn subscription_display_names_the_receiver() {
        let service = Service::new(
            "http://localhost:7071/",
            vec![Endpoint::path("/api/hook", ["Foo"]).unwrap(), Endpoint::function("OnFoo", ["Foo"]).unwrap()],
        )
        .unwrap();

        let by_path = Subscription::new(&service, &service.endpoints()[0]);
        let by_function = Subscription::new(&service, &service.endpoints()[1]);

        assert_eq!(by_path.to_string(), "http://localhost:7071/api/hook");
        assert_eq!(by_function.to_string(), "http://localhost:7071/EventGridFunc:OnFoo");
    }

    #[test]
    fn service_config_deserializes_and_validates() {
        let json = serde_json::json!({
            "base_address": "http://localhost:7071",
            "endpoints": [
                { "event_grid_function": "OnOrder", "event_types": ["Order.Created", "Order.Paid"] },
                { "path": "/webhooks/orders", "event_types": ["Order.Created"] }
            ]
        });

        let service: Service = serde_json::from_value(json).unwrap();
        assert_eq!(service.endpoints().len(), 2);
        assert_eq!(service.endpoints()[0].receiver(), &Receiver::Function("OnOrder".into()));

        let invalid = serde_json::json!({
            "base_address": "http://localhost:7071",
            "endpoints": [{ "event_types": ["Order.Created"] }]
        });
        assert!(serde_json::from_value::<Service>(invalid).is_err());
    }

    #[test]
    fn event_serializes_camel_case_without_absent_fields() {
        let event: EventGridEvent = serde_json::from_value(serde_json::json!({
            "id": "1",
            "eventType": "Foo",
            "subject": "s",
            "data": { "n": 1 },
            "eventTime": "2024-01-01T00:00:00Z",
            "dataVersion": "1"
        }))
        .unwrap();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "Foo");
        assert_eq!(value["dataVersion"], "1");
        assert!(value.get("topic").is_none());
        assert!(value.get("event_type").is_none());
    }

    #[test]
    fn event_without_required_fields_is_rejected() {
        let missing_type = serde_json::json!({
            "id": "1",
            "subject": "s",
            "data": {},
            "eventTime": "2024-01-01T00:00:00Z",
            "dataVersion": "1"
        });
        assert!(serde_json::from_value::<EventGridEvent>(missing_type).is_err());
    }
}
