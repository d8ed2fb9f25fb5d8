//! gridlet event-routing emulator.
//!
//! Main entry point. Loads configuration, wires the receiver to the delivery
//! processor and coordinates graceful startup and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use gridlet_api::{create_router, shutdown_signal, start_server, AppState, Config};
use gridlet_core::{Archive, Clock, JsonLinesSink, MessageSink, NoOpSink, RealClock};
use gridlet_delivery::{DeliveryProcessor, DeliveryQueue, EventGridClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config)?;

    info!("Starting gridlet event-routing emulator");

    let addr = config.parse_server_addr()?;
    info!(
        server_addr = %addr,
        events_path = %config.events_path,
        max_attempts = config.max_attempts,
        storage_enabled = config.storage.enabled,
        "Configuration loaded"
    );

    let registry = Arc::new(config.build_registry());
    info!(event_types = registry.len(), "Subscription registry built\n{}", registry);
    if registry.is_empty() {
        warn!("No subscribers configured, every received event will be dropped");
    }

    let archive = Archive::new(create_sink(&config).await);
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let queue = DeliveryQueue::new();
    let shutdown = CancellationToken::new();

    let processor = DeliveryProcessor::new(
        queue.clone(),
        Arc::new(EventGridClient::new(config.to_client_config())),
        archive.clone(),
        clock.clone(),
        config.to_processor_config(),
        shutdown.child_token(),
    );
    let processor_handle = processor.spawn();

    let state = AppState { registry, queue, archive, clock };
    let app = create_router(state, &config.events_path, config.request_timeout());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    info!(addr = %addr, "gridlet is ready to receive events");

    let served = start_server(app, addr, shutdown.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "Server failed");
        shutdown.cancel();
    }

    match processor_handle.shutdown(config.shutdown_timeout()).await {
        Ok(stats) => info!(
            delivered = stats.delivered,
            deadlettered = stats.deadlettered,
            dropped_on_shutdown = stats.dropped_on_shutdown,
            "Delivery processor stopped"
        ),
        Err(e) => error!(error = %e, "Delivery processor did not stop cleanly"),
    }

    info!("gridlet shutdown complete");
    served.context("HTTP server failed")
}

/// Initializes tracing. `RUST_LOG` takes precedence over the configured
/// filter.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Opens the JSON-lines sink when storage is enabled. A sink that cannot be
/// opened degrades to discarding records.
async fn create_sink(config: &Config) -> Arc<dyn MessageSink> {
    if !config.storage.enabled {
        info!("Message storage disabled");
        return Arc::new(NoOpSink::new());
    }

    match JsonLinesSink::create(&config.storage.directory, config.storage.queue_names()).await {
        Ok(sink) => {
            info!(directory = %sink.directory().display(), "Message storage enabled");
            Arc::new(sink)
        },
        Err(e) => {
            warn!(
                directory = %config.storage.directory.display(),
                error = %e,
                "Failed to open message storage, records will be discarded"
            );
            Arc::new(NoOpSink::new())
        },
    }
}
