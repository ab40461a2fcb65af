//! Report stage: renders a completion line per notification.

use super::decode;
use async_trait::async_trait;
use bulk_purchase_core::event::PipelineEvent;
use bulk_purchase_core::types::BatchId;
use bulk_purchase_runtime::{HandlerError, MessageHandler};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// The completion line for an arrived order.
#[must_use]
pub fn render_report(order_id: &BatchId) -> String {
    format!("Your order with ID {order_id} has arrived")
}

/// Where rendered reports go.
pub trait ReportSink: Send + Sync {
    /// Emit one rendered report line.
    fn emit(&self, line: &str);
}

/// Writes each report to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReportSink;

impl ReportSink for StdoutReportSink {
    fn emit(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            error!(error = %e, "Failed to write report");
        }
    }
}

/// Collects reports in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryReportSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports emitted so far, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ReportSink for MemoryReportSink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Consumes `reports` and renders each `notification_arrived`.
pub struct ReportHandler {
    sink: Arc<dyn ReportSink>,
}

impl ReportHandler {
    /// Create a handler writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageHandler for ReportHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        match decode("reporter", payload)? {
            Some(PipelineEvent::NotificationArrived(notification)) => {
                let line = render_report(&notification.order_id);
                info!(order_id = %notification.order_id, "{line}");
                self.sink.emit(&line);
            }
            Some(other) => warn!(kind = other.kind(), "Unknown event"),
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn handler() -> (Arc<MemoryReportSink>, ReportHandler) {
        let sink = Arc::new(MemoryReportSink::new());
        let handler = ReportHandler::new(sink.clone());
        (sink, handler)
    }

    #[test]
    fn renders_completion_line() {
        assert_eq!(
            render_report(&BatchId::new("42")),
            "Your order with ID 42 has arrived"
        );
    }

    #[tokio::test]
    async fn notification_is_rendered() {
        let (sink, handler) = handler();

        handler
            .handle(br#"{"event": "notification_arrived", "order_id": "batch-1"}"#)
            .await
            .unwrap();

        assert_eq!(sink.lines(), vec!["Your order with ID batch-1 has arrived"]);
    }

    #[tokio::test]
    async fn other_events_render_nothing() {
        let (sink, handler) = handler();

        handler
            .handle(br#"{"event": "order_created", "order_id": "1"}"#)
            .await
            .unwrap();
        handler
            .handle(
                br#"{"event": "bulk_purchase", "batch_id": "b", "provider_id": "P1", "orders": [], "flushed_at": "2025-01-01T00:00:00Z"}"#,
            )
            .await
            .unwrap();

        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let (sink, handler) = handler();

        let err = handler.handle(b"\xff\xfe").await.unwrap_err();

        assert!(matches!(err, HandlerError::Malformed(_)));
        assert!(sink.lines().is_empty());
    }
}
