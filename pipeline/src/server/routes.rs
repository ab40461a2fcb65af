//! Router configuration for the aggregator.

use super::handlers::{aggregate_order, metrics, pending_orders};
use super::state::AppState;
use axum::{
    Router,
    http::Uri,
    routing::{get, post},
};
use bulk_purchase_web::{AppError, handlers::health_check, with_observability};

/// Build the aggregator's router with tracing and correlation ids applied.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/aggregate_order", post(aggregate_order))
        .route("/aggregate_order/pending", get(pending_orders))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .fallback(|uri: Uri| async move { AppError::not_found(uri.path()) })
        .with_state(state);

    with_observability(router)
}
