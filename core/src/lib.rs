//! # Bulk Purchase Core
//!
//! Core types and traits for the bulk purchase pipeline.
//!
//! The pipeline buffers individual orders per provider and, once a provider's
//! buffer reaches a threshold, publishes one bulk purchase. Downstream stages
//! turn each bulk purchase into a notification and each notification into a
//! completion report.
//!
//! ## Core Concepts
//!
//! - **Order request**: an inbound `{provider_id, product_id, quantity}` submission
//! - **Order line**: a validated `{product_id, quantity}` buffered under its provider
//! - **Pipeline event**: the tagged union of everything published to the broker
//! - **Broker client**: declare / publish / subscribe with explicit acknowledgment
//! - **Environment**: injected clock and id generator
//!
//! ## Example
//!
//! ```
//! use bulk_purchase_core::order::OrderRequest;
//!
//! let order = OrderRequest::new("P1", "X", 3).validate().unwrap();
//! assert_eq!(order.provider_id.as_str(), "P1");
//! assert_eq!(order.line.quantity, 3);
//! ```

pub mod broker;
pub mod environment;
pub mod event;
pub mod order;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Queue names. Every participant declares the queues it touches at startup.
pub mod queues {
    /// Bulk purchases published by the aggregator
    pub const BULK_PURCHASES: &str = "bulk_purchases";

    /// Notifications published by the notification stage
    pub const REPORTS: &str = "reports";
}

/// Number of buffered order lines that triggers a flush unless configured otherwise.
pub const DEFAULT_ORDER_THRESHOLD: usize = 10;
