//! HTTP intake for the aggregator.
//!
//! - `POST /aggregate_order`: submit one order
//! - `GET /aggregate_order/pending`: buffered lines per provider
//! - `GET /health`: liveness
//! - `GET /metrics`: Prometheus scrape

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
