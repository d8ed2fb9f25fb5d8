//! Configuration for the gridlet emulator.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use gridlet_core::{
    sink::{DEFAULT_DEADLETTER_QUEUE, DEFAULT_RECEIVED_QUEUE},
    QueueNames, Service, SubscriptionRegistry,
};
use gridlet_delivery::{
    retry::DEFAULT_MAX_ATTEMPTS, ClientConfig, ProcessorConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "gridlet.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "GRIDLET_CONFIG";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "GRIDLET_";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `GRIDLET_`, nested keys split on `__`
///    (highest priority)
/// 2. Configuration file (`gridlet.toml`, or the path in `GRIDLET_CONFIG`)
/// 3. Built-in defaults (lowest priority)
///
/// Subscribers are declared in the file:
///
/// ```toml
/// [[services]]
/// base_address = "http://localhost:7071"
///
/// [[services.endpoints]]
/// event_grid_function = "OnOrderCreated"
/// event_types = ["Order.Created"]
///
/// [[services.endpoints]]
/// path = "/api/webhooks/orders"
/// event_types = ["Order.Created", "Order.Paid"]
/// ```
///
/// # Example
///
/// ```no_run
/// use gridlet_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path accepting event batches.
    #[serde(default = "default_events_path")]
    pub events_path: String,
    /// Inbound request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    // Client
    /// Outbound delivery timeout in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,

    // Retry
    /// Maximum delivery attempts per event and subscription.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base of the retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base: u64,
    /// Ceiling of the retry backoff in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: u64,
    /// Base of the backoff after polling an empty queue.
    #[serde(default = "default_idle_base")]
    pub idle_base: u64,
    /// Ceiling of the idle backoff in seconds.
    #[serde(default = "default_idle_max_delay")]
    pub idle_max_delay_seconds: u64,
    /// Base of the backoff after a queue fault.
    #[serde(default = "default_dequeue_error_base")]
    pub dequeue_error_base: u64,
    /// Ceiling of the queue fault backoff in seconds.
    #[serde(default = "default_dequeue_error_max_delay")]
    pub dequeue_error_max_delay_seconds: u64,
    /// Pause after every dispatched task in milliseconds.
    #[serde(default = "default_pace_interval")]
    pub pace_interval_ms: u64,

    // Lifecycle
    /// How long shutdown waits for the processor and retry units.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Storage
    /// Message sink settings.
    #[serde(default)]
    pub storage: StorageConfig,

    // Subscribers
    /// Subscriber applications and their endpoints.
    #[serde(default)]
    pub services: Vec<Service>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

/// Message sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Write received and deadlettered events to JSON-lines files.
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding the queue files.
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    /// Name of the received queue.
    #[serde(default = "default_received_queue")]
    pub received_queue: String,
    /// Name of the deadletter queue.
    #[serde(default = "default_deadletter_queue")]
    pub deadletter_queue: String,
}

impl StorageConfig {
    /// Returns the configured queue names.
    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            received: self.received_queue.clone(),
            deadletter: self.deadletter_queue.clone(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_storage_directory(),
            received_queue: default_received_queue(),
            deadletter_queue: default_deadletter_queue(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed, a subscriber entry is
    /// invalid, or validation fails.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::from_figment(Self::figment(&path))
    }

    /// Builds the layered figment without extracting it.
    pub fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extracts and validates configuration from a figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_base: self.retry_base,
            retry_max_delay: Duration::from_secs(self.retry_max_delay_seconds),
            idle_base: self.idle_base,
            idle_max_delay: Duration::from_secs(self.idle_max_delay_seconds),
            error_base: self.dequeue_error_base,
            error_max_delay: Duration::from_secs(self.dequeue_error_max_delay_seconds),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Convert to processor configuration.
    pub fn to_processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            retry_policy: self.to_retry_policy(),
            pace_interval: Duration::from_millis(self.pace_interval_ms),
        }
    }

    /// Inbound request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Shutdown wait limit.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Builds the routing table from the configured services.
    pub fn build_registry(&self) -> SubscriptionRegistry {
        SubscriptionRegistry::build(&self.services)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Validate configuration values.
    ///
    /// Services and endpoints validate themselves when constructed, so only
    /// scalar settings are checked here.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if !self.events_path.starts_with('/') {
            anyhow::bail!("events_path must start with '/'");
        }

        if self.events_path == "/" || self.events_path == "/health" {
            anyhow::bail!("events_path '{}' collides with a built-in route", self.events_path);
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        for (name, base) in [
            ("retry_base", self.retry_base),
            ("idle_base", self.idle_base),
            ("dequeue_error_base", self.dequeue_error_base),
        ] {
            if base < 2 {
                anyhow::bail!("{name} must be at least 2");
            }
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        if self.storage.enabled && self.storage.received_queue == self.storage.deadletter_queue {
            anyhow::bail!("storage queue names must differ");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            events_path: default_events_path(),
            request_timeout_seconds: default_request_timeout(),
            delivery_timeout_seconds: default_delivery_timeout(),
            max_attempts: default_max_attempts(),
            retry_base: default_retry_base(),
            retry_max_delay_seconds: default_retry_max_delay(),
            idle_base: default_idle_base(),
            idle_max_delay_seconds: default_idle_max_delay(),
            dequeue_error_base: default_dequeue_error_base(),
            dequeue_error_max_delay_seconds: default_dequeue_error_max_delay(),
            pace_interval_ms: default_pace_interval(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            storage: StorageConfig::default(),
            services: Vec::new(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5080
}

fn default_events_path() -> String {
    "/api/events".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_base() -> u64 {
    4
}

fn default_retry_max_delay() -> u64 {
    600
}

fn default_idle_base() -> u64 {
    2
}

fn default_idle_max_delay() -> u64 {
    20
}

fn default_dequeue_error_base() -> u64 {
    4
}

fn default_dequeue_error_max_delay() -> u64 {
    600
}

fn default_pace_interval() -> u64 {
    50
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from(".gridlet")
}

fn default_received_queue() -> String {
    DEFAULT_RECEIVED_QUEUE.to_string()
}

fn default_deadletter_queue() -> String {
    DEFAULT_DEADLETTER_QUEUE.to_string()
}

fn default_log_level() -> String {
    "info,gridlet=debug,tower_http=debug".to_string()
}
