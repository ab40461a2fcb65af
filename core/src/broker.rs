//! Message broker abstraction shared by every pipeline stage.
//!
//! This module provides the [`BrokerClient`] trait: declare a named queue,
//! publish to it, and subscribe to it. Producers and consumers depend only on
//! this trait, so the same service code runs against the Kafka-compatible
//! broker in production and the in-memory broker in tests.
//!
//! # Architecture
//!
//! ```text
//!   submit_order ──► Aggregator ──publish──► [bulk_purchases]
//!                                                  │ subscribe
//!                                                  ▼
//!                                          Notification stage ──publish──► [reports]
//!                                                                              │ subscribe
//!                                                                              ▼
//!                                                                        Report stage
//! ```
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message may be delivered more than once
//! - **Explicit acknowledgment**: every [`Delivery`] is either acked or
//!   requeued by the consumer after processing; a delivery dropped without a
//!   decision counts as requeued
//! - **FIFO per queue**: no ordering across queues
//!
//! # Implementations
//!
//! - `InMemoryBroker` (testing crate) - For tests (fast, in-process)
//! - `RedpandaBroker` (redpanda crate) - For production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! use bulk_purchase_core::broker::BrokerClient;
//! use futures::StreamExt;
//!
//! async fn drain(broker: &dyn BrokerClient) -> Result<(), BrokerError> {
//!     broker.declare_queue("reports").await?;
//!
//!     let mut deliveries = broker.subscribe("reports").await?;
//!     while let Some(result) = deliveries.next().await {
//!         let delivery = result?;
//!         println!("{} bytes", delivery.payload().len());
//!         delivery.ack();
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::{PipelineEvent, SerializedEvent};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The queue has not been declared
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Failed to declare a queue
    #[error("Declare failed for queue '{queue}': {reason}")]
    DeclareFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message to a queue
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Consumer verdict on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processing finished; remove the message from the queue
    Ack,
    /// Processing failed transiently; deliver the message again
    Requeue,
}

/// One received message together with its acknowledgment handle.
///
/// Exactly one of [`Delivery::ack`] or [`Delivery::requeue`] should be called
/// once processing has finished. Dropping the delivery without either is
/// treated as a requeue, so a consumer that crashes mid-handler never loses
/// the message.
#[derive(Debug)]
pub struct Delivery {
    queue: String,
    payload: Vec<u8>,
    redelivered: bool,
    acker: Option<oneshot::Sender<AckDecision>>,
}

/// Broker-side half of a [`Delivery`]'s acknowledgment.
#[derive(Debug)]
pub struct PendingAck(oneshot::Receiver<AckDecision>);

impl PendingAck {
    /// Wait for the consumer's verdict.
    ///
    /// Resolves to [`AckDecision::Requeue`] if the delivery was dropped unsettled.
    pub async fn decision(self) -> AckDecision {
        self.0.await.unwrap_or(AckDecision::Requeue)
    }
}

impl Delivery {
    /// Create a delivery and the handle its broker waits on.
    #[must_use]
    pub fn new(queue: impl Into<String>, payload: Vec<u8>, redelivered: bool) -> (Self, PendingAck) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            queue: queue.into(),
            payload,
            redelivered,
            acker: Some(tx),
        };
        (delivery, PendingAck(rx))
    }

    /// Queue the message was received from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this message was delivered before and requeued.
    #[must_use]
    pub const fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge successful processing.
    pub fn ack(mut self) {
        self.settle(AckDecision::Ack);
    }

    /// Return the message to the queue for redelivery.
    pub fn requeue(mut self) {
        self.settle(AckDecision::Requeue);
    }

    fn settle(&mut self, decision: AckDecision) {
        if let Some(acker) = self.acker.take() {
            // The broker side may already be gone (stream closed); nothing left to settle then.
            let _ = acker.send(decision);
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for message broker implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one client is shared by every
/// concurrent publisher in a process.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// broker can be held as `Arc<dyn BrokerClient>`.
pub trait BrokerClient: Send + Sync {
    /// Declare a queue, creating it if absent.
    ///
    /// Idempotent: declaring an existing queue is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclareFailed`] if the broker rejects the declaration.
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Publish a message to a queue.
    ///
    /// The broker client does not retry; a failed publish is reported once and
    /// the caller decides what to do with the message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        queue: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Subscribe to a queue and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;
}

/// Encode a [`PipelineEvent`] and publish it.
///
/// # Errors
///
/// Returns [`BrokerError::PublishFailed`] if encoding or publishing fails.
pub async fn publish_event(
    broker: &dyn BrokerClient,
    queue: &str,
    event: &PipelineEvent,
) -> Result<(), BrokerError> {
    let serialized = SerializedEvent::from_event(event).map_err(|e| BrokerError::PublishFailed {
        queue: queue.to_string(),
        reason: e.to_string(),
    })?;

    broker.publish(queue, &serialized).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn broker_client_is_dyn_compatible() {
        fn assert_dyn(_: Option<&dyn BrokerClient>) {}
        assert_dyn(None);
    }

    #[tokio::test]
    async fn ack_is_observed_by_broker_side() {
        let (delivery, pending) = Delivery::new("reports", b"{}".to_vec(), false);
        assert_eq!(delivery.queue(), "reports");
        delivery.ack();
        assert_eq!(pending.decision().await, AckDecision::Ack);
    }

    #[tokio::test]
    async fn requeue_is_observed_by_broker_side() {
        let (delivery, pending) = Delivery::new("reports", Vec::new(), true);
        assert!(delivery.redelivered());
        delivery.requeue();
        assert_eq!(pending.decision().await, AckDecision::Requeue);
    }

    #[tokio::test]
    async fn dropped_delivery_counts_as_requeue() {
        let (delivery, pending) = Delivery::new("reports", Vec::new(), false);
        drop(delivery);
        assert_eq!(pending.decision().await, AckDecision::Requeue);
    }

    #[test]
    fn event_type_is_available_for_keys() {
        let event = PipelineEvent::NotificationArrived(crate::event::NotificationEvent {
            order_id: crate::types::BatchId::new("b"),
        });
        assert_eq!(event.event_type(), "notification_arrived.v1");
    }
}
