//! Order aggregation service.
//!
//! Serves `POST /aggregate_order` and publishes a bulk purchase to
//! `bulk_purchases` whenever a provider's bucket reaches the threshold.

use anyhow::Context;
use bulk_purchase_pipeline::{
    Config, OrderAggregator,
    server::{AppState, build_router},
    service::{connect_broker, spawn_signal_forwarder},
    telemetry::init_tracing,
};
use bulk_purchase_runtime::{ConnectAborted, metrics::MetricsServer};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting order aggregator");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.broker.url,
        threshold = config.aggregator.threshold,
        bind = %config.server.bind_address(),
        "Configuration loaded"
    );

    let metrics = if config.metrics.enabled {
        let mut server = MetricsServer::new(config.metrics.socket_addr()?);
        server.start().context("Failed to install metrics recorder")?;
        server.handle().cloned()
    } else {
        None
    };

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    spawn_signal_forwarder(shutdown_tx.clone());

    let broker = match connect_broker(&config.broker, &mut shutdown_rx).await {
        Ok(broker) => broker,
        Err(ConnectAborted::Shutdown { .. }) => return Ok(()),
        Err(e) => return Err(e).context("Failed to connect to broker"),
    };

    let aggregator = Arc::new(
        OrderAggregator::builder()
            .broker(Arc::new(broker))
            .threshold(config.aggregator.threshold)
            .build()?,
    );
    aggregator
        .declare_queues()
        .await
        .context("Failed to declare queues")?;

    let app = build_router(AppState::new(Arc::clone(&aggregator)).with_metrics(metrics));

    let listener = tokio::net::TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;
    info!(addr = %listener.local_addr()?, "Aggregator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("HTTP server failed")?;

    let lost = aggregator.buffered_lines();
    if lost > 0 {
        warn!(lines = lost, providers = aggregator.pending().len(), "Discarding buffered orders on shutdown");
    }

    info!("Order aggregator stopped");
    Ok(())
}
