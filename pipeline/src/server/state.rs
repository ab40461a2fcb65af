//! Application state shared across HTTP handlers.

use crate::aggregator::OrderAggregator;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Cloned into every request; everything inside is behind an `Arc` or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// The order aggregator
    pub aggregator: Arc<OrderAggregator>,
    /// Recorder rendered by `/metrics`; `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state without a metrics recorder.
    #[must_use]
    pub const fn new(aggregator: Arc<OrderAggregator>) -> Self {
        Self {
            aggregator,
            metrics: None,
        }
    }

    /// Attach the recorder `/metrics` renders.
    #[must_use]
    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}
