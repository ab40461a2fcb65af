//! Axum integration for the bulk purchase pipeline.
//!
//! This crate holds the HTTP plumbing shared by every service, leaving routes
//! and domain handlers to the services themselves:
//!
//! - [`AppError`]: one JSON error shape (`{code, message}`) for all failures
//! - [`middleware::correlation_id`]: request correlation ids and spans
//! - [`handlers::health_check`] and [`handlers::render_metrics`]
//! - [`with_observability`]: the standard layer stack
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::{get, post}};
//! use bulk_purchase_web::{handlers, with_observability};
//!
//! let app = with_observability(
//!     Router::new()
//!         .route("/aggregate_order", post(aggregate_order))
//!         .route("/health", get(handlers::health_check))
//!         .with_state(state),
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;

use axum::Router;
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Wrap a router with HTTP tracing and correlation ids.
#[must_use]
pub fn with_observability(router: Router) -> Router {
    router
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::correlation_id))
}
