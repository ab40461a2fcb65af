//! # Bulk Purchase Runtime
//!
//! Service plumbing shared by every pipeline process.
//!
//! ## Core Components
//!
//! - **QueueConsumer**: subscribe-process-reconnect loop with explicit acks
//! - **MessageHandler**: the per-message work a consumer delegates to
//! - **connect_with_retry**: keep trying the broker until it is reachable
//! - **Metrics**: Prometheus recorder and per-component recorders
//! - **Shutdown**: signal handling and bounded task draining
//!
//! ## Example
//!
//! ```ignore
//! use bulk_purchase_runtime::{QueueConsumer, shutdown};
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let handle = QueueConsumer::new("reporter", "reports", broker, handler, shutdown_tx.subscribe())
//!     .spawn();
//!
//! shutdown::shutdown_signal().await;
//! let _ = shutdown_tx.send(());
//! shutdown::await_tasks(vec![("reporter".into(), handle)], timeout).await;
//! ```

/// Queue consumer with automatic reconnection
pub mod consumer;

/// Message handler trait and error classification
pub mod handler;

/// Prometheus metrics for observability
pub mod metrics;

/// Broker connection retry
pub mod retry;

/// Graceful shutdown
pub mod shutdown;

pub use consumer::QueueConsumer;
pub use handler::{HandlerError, MessageHandler};
pub use retry::{ConnectAborted, RetryPolicy, connect_with_retry};
