//! HTTP request handlers shared by every service.

pub mod health;
pub mod metrics;

// Re-export common handler utilities
pub use health::health_check;
pub use metrics::render_metrics;
