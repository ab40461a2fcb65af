//! Order intake handlers.

use super::state::AppState;
use crate::aggregator::{AggregatorError, FlushOutcome};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::Response,
};
use bulk_purchase_core::order::OrderRequest;
use bulk_purchase_core::types::BatchId;
use bulk_purchase_web::{AppError, WebResult, handlers::render_metrics};
use serde::Serialize;
use std::collections::BTreeMap;

/// Response for an accepted order.
#[derive(Debug, Serialize)]
pub struct AggregateOrderResponse {
    /// Always "Order aggregated"
    pub message: &'static str,
    /// Provider whose bucket received the line
    pub provider_id: String,
    /// Lines left in the bucket
    pub buffered: usize,
    /// Batches this submission published
    pub flushed_batches: Vec<BatchId>,
    /// Whether a completed batch is waiting for a publish retry
    pub deferred: bool,
}

/// Buffered lines per provider.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    /// Lines per provider that trigger a flush
    pub threshold: usize,
    /// Non-empty buckets
    pub providers: BTreeMap<String, usize>,
}

/// Submit one order.
///
/// # Endpoint
///
/// ```text
/// POST /aggregate_order
/// Content-Type: application/json
///
/// {"provider_id": "P1", "product_id": "X", "quantity": 2}
/// ```
///
/// # Errors
///
/// Returns 400 if the body is not JSON or the order is incomplete.
pub async fn aggregate_order(
    State(state): State<AppState>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> WebResult<Json<AggregateOrderResponse>> {
    let Json(request) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let receipt = state.aggregator.submit_order(&request).await.map_err(|e| match e {
        AggregatorError::Validation(e) => AppError::from(e),
        other => AppError::internal("Order could not be aggregated").with_source(other),
    })?;

    let (flushed_batches, deferred) = match receipt.flush {
        None => (Vec::new(), false),
        Some(FlushOutcome::Published { batch_ids }) => (batch_ids, false),
        Some(FlushOutcome::Deferred { published, .. }) => (published, true),
    };

    Ok(Json(AggregateOrderResponse {
        message: "Order aggregated",
        provider_id: receipt.provider_id.to_string(),
        buffered: receipt.buffered,
        flushed_batches,
        deferred,
    }))
}

/// Snapshot of buffered lines.
///
/// ```text
/// GET /aggregate_order/pending
/// ```
#[allow(clippy::unused_async)]
pub async fn pending_orders(State(state): State<AppState>) -> Json<PendingResponse> {
    Json(PendingResponse {
        threshold: state.aggregator.threshold(),
        providers: state
            .aggregator
            .pending()
            .into_iter()
            .map(|(provider, count)| (provider.to_string(), count))
            .collect(),
    })
}

/// Prometheus scrape of this process.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    render_metrics(state.metrics.as_ref())
}
