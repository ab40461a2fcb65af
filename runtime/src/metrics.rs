//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all pipeline components:
//! - Order intake and aggregation
//! - Bulk purchase publishing
//! - Queue consumers
//! - Broker connection attempts
//!
//! # Example
//!
//! ```rust,no_run
//! use bulk_purchase_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Install the recorder; render() output is served by the HTTP router
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Either installs a recorder whose output is rendered on demand
/// ([`MetricsServer::start`], used by the aggregator's `/metrics` route), or
/// installs a recorder with its own HTTP listener ([`MetricsServer::serve`],
/// used by the consumer processes, which have no router).
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the standalone listener binds to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the recorder.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Register metric descriptions and serve them on `addr` at `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn serve(&self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Aggregator Metrics
    describe_counter!(
        "orders_accepted_total",
        "Total number of order submissions accepted into a provider bucket"
    );
    describe_counter!(
        "orders_rejected_total",
        "Total number of order submissions rejected by validation"
    );
    describe_counter!(
        "bulk_purchases_published_total",
        "Total number of bulk purchase events published"
    );
    describe_counter!(
        "bulk_purchase_publish_failures_total",
        "Total number of bulk purchase publishes that failed and were re-buffered"
    );
    describe_gauge!(
        "aggregator_buffered_orders",
        "Order lines currently buffered across all providers"
    );

    // Consumer Metrics
    describe_counter!(
        "consumer_messages_total",
        "Messages handled by queue consumers, labelled by consumer and outcome"
    );

    // Broker Metrics
    describe_counter!(
        "broker_connect_attempts_total",
        "Total number of broker connection attempts"
    );
}

/// Aggregator metrics recorder.
pub struct AggregatorMetrics;

impl AggregatorMetrics {
    /// Record an accepted submission.
    pub fn record_accepted() {
        counter!("orders_accepted_total").increment(1);
        gauge!("aggregator_buffered_orders").increment(1.0);
    }

    /// Record a rejected submission.
    pub fn record_rejected() {
        counter!("orders_rejected_total").increment(1);
    }

    /// Record a published batch of `lines` order lines.
    #[allow(clippy::cast_precision_loss)] // Batch sizes are far below f64 precision limits
    pub fn record_published(lines: usize) {
        counter!("bulk_purchases_published_total").increment(1);
        gauge!("aggregator_buffered_orders").decrement(lines as f64);
    }

    /// Record a failed bulk purchase publish.
    pub fn record_publish_failure() {
        counter!("bulk_purchase_publish_failures_total").increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a handled message.
    ///
    /// `outcome` is one of `processed`, `dropped`, `requeued`.
    pub fn record(consumer: &str, outcome: &'static str) {
        counter!(
            "consumer_messages_total",
            "consumer" => consumer.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Broker metrics recorder.
pub struct BrokerMetrics;

impl BrokerMetrics {
    /// Record a connection attempt.
    pub fn record_connect_attempt() {
        counter!("broker_connect_attempts_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // Note: handle might be None if another test already initialized the recorder
    }

    #[test]
    fn recorders_do_not_panic_without_recorder() {
        AggregatorMetrics::record_accepted();
        AggregatorMetrics::record_rejected();
        AggregatorMetrics::record_published(10);
        AggregatorMetrics::record_publish_failure();
        ConsumerMetrics::record("notifier", "processed");
        BrokerMetrics::record_connect_attempt();
    }
}
