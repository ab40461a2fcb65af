//! Message handlers for the downstream pipeline stages.
//!
//! Each stage is a [`MessageHandler`](bulk_purchase_runtime::MessageHandler)
//! driven by a [`QueueConsumer`](bulk_purchase_runtime::QueueConsumer):
//!
//! ```text
//! bulk_purchases ──► BulkPurchaseHandler ──► reports ──► ReportHandler ──► ReportSink
//! ```

pub mod notification;
pub mod report;

pub use notification::BulkPurchaseHandler;
pub use report::{MemoryReportSink, ReportHandler, ReportSink, StdoutReportSink, render_report};

use bulk_purchase_core::event::{Event, EventError, PipelineEvent};
use bulk_purchase_runtime::HandlerError;

/// Decode a payload, separating unknown kinds from broken payloads.
///
/// Returns `Ok(None)` for a well-formed event of a kind this build does not
/// know; callers log and skip those.
pub(crate) fn decode(stage: &str, payload: &[u8]) -> Result<Option<PipelineEvent>, HandlerError> {
    match PipelineEvent::from_bytes(payload) {
        Ok(event) => Ok(Some(event)),
        Err(EventError::UnknownEventType(kind)) => {
            tracing::warn!(stage, kind = %kind, "Unknown event; ignoring");
            Ok(None)
        }
        Err(e) => Err(HandlerError::Malformed(e.to_string())),
    }
}
