//! Report service: prints a completion line for every `notification_arrived`.

use anyhow::Context;
use bulk_purchase_core::queues;
use bulk_purchase_pipeline::{
    Config,
    service::{ConsumerService, connect_broker, spawn_signal_forwarder},
    stages::{ReportHandler, StdoutReportSink},
    telemetry::init_tracing,
};
use bulk_purchase_runtime::{ConnectAborted, metrics::MetricsServer};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting reporter");

    let config = Config::from_env().context("Failed to load configuration")?;
    if config.metrics.enabled {
        MetricsServer::new(config.metrics.socket_addr()?)
            .serve()
            .context("Failed to start metrics listener")?;
    }

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    spawn_signal_forwarder(shutdown_tx.clone());

    let broker = match connect_broker(&config.broker, &mut shutdown_rx).await {
        Ok(broker) => Arc::new(broker),
        Err(ConnectAborted::Shutdown { .. }) => return Ok(()),
        Err(e) => return Err(e).context("Failed to connect to broker"),
    };

    ConsumerService {
        name: "reporter",
        queue: queues::REPORTS,
        publishes_to: &[],
        handler: Arc::new(ReportHandler::new(Arc::new(StdoutReportSink))),
    }
    .run(broker, &config, &shutdown_tx, shutdown_rx)
    .await
    .context("Reporter failed")?;

    info!("Reporter stopped");
    Ok(())
}
