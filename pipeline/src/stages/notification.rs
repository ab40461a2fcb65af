//! Notification stage: one `notification_arrived` per bulk purchase.

use super::decode;
use async_trait::async_trait;
use bulk_purchase_core::broker::{BrokerClient, publish_event};
use bulk_purchase_core::environment::{IdGenerator, UuidGenerator};
use bulk_purchase_core::event::{NotificationEvent, PipelineEvent};
use bulk_purchase_core::types::BatchId;
use bulk_purchase_core::queues;
use bulk_purchase_runtime::{HandlerError, MessageHandler};
use std::sync::Arc;
use tracing::{info, warn};

/// Consumes `bulk_purchases` and publishes a notification for each batch to `reports`.
///
/// The notification's `order_id` is the batch id. A bulk purchase without
/// one gets `{provider_id}-{generated id}`. A failed publish is reported as
/// transient so the bulk purchase is redelivered; downstream may therefore
/// see the same notification more than once.
pub struct BulkPurchaseHandler {
    broker: Arc<dyn BrokerClient>,
    ids: Arc<dyn IdGenerator>,
}

impl BulkPurchaseHandler {
    /// Create a handler publishing through `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Use `ids` for bulk purchases that arrive without a batch id.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

#[async_trait]
impl MessageHandler for BulkPurchaseHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let Some(event) = decode("notifier", payload)? else {
            return Ok(());
        };

        let purchase = match event {
            PipelineEvent::BulkPurchase(purchase) => purchase,
            other => {
                warn!(kind = other.kind(), "Not a bulk purchase; ignoring");
                return Ok(());
            }
        };

        let batch_id = purchase.batch_id.unwrap_or_else(|| {
            let derived = BatchId::new(format!("{}-{}", purchase.provider_id, self.ids.next_id()));
            info!(
                provider_id = %purchase.provider_id,
                batch_id = %derived,
                "Bulk purchase has no batch id; derived one"
            );
            derived
        });

        let notification = PipelineEvent::NotificationArrived(NotificationEvent {
            order_id: batch_id.clone(),
        });

        publish_event(self.broker.as_ref(), queues::REPORTS, &notification)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        info!(
            batch_id = %batch_id,
            provider_id = %purchase.provider_id,
            lines = purchase.orders.len(),
            "Notification published"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bulk_purchase_core::event::{BulkPurchaseEvent, Event};
    use bulk_purchase_core::environment::Clock;
    use bulk_purchase_core::types::{OrderLine, ProductId, ProviderId};
    use bulk_purchase_testing::{InMemoryBroker, SequentialIdGenerator, test_clock};

    async fn setup() -> (InMemoryBroker, BulkPurchaseHandler) {
        let broker = InMemoryBroker::new();
        broker.declare_queue(queues::REPORTS).await.unwrap();
        let handler = BulkPurchaseHandler::new(Arc::new(broker.clone()));
        (broker, handler)
    }

    fn bulk_purchase(batch: &str) -> Vec<u8> {
        PipelineEvent::BulkPurchase(BulkPurchaseEvent {
            batch_id: Some(BatchId::new(batch)),
            provider_id: ProviderId::new("P1"),
            orders: vec![OrderLine::new(ProductId::new("X"), 1)],
            flushed_at: Some(test_clock().now()),
        })
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_notification_with_batch_id() {
        let (broker, handler) = setup().await;

        handler.handle(&bulk_purchase("batch-7")).await.unwrap();

        assert_eq!(
            broker.published_events(queues::REPORTS),
            vec![PipelineEvent::NotificationArrived(NotificationEvent {
                order_id: BatchId::new("batch-7"),
            })]
        );
    }

    #[tokio::test]
    async fn bulk_purchase_without_batch_id_still_notifies() {
        let (broker, handler) = setup().await;
        let handler = handler.with_id_generator(Arc::new(SequentialIdGenerator::new("n")));

        handler
            .handle(br#"{"event": "bulk_purchase", "provider_id": "P1", "orders": [{"product_id": "X", "quantity": 1}]}"#)
            .await
            .unwrap();

        assert_eq!(
            broker.published_events(queues::REPORTS),
            vec![PipelineEvent::NotificationArrived(NotificationEvent {
                order_id: BatchId::new("P1-n-1"),
            })]
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let (broker, handler) = setup().await;

        let err = handler.handle(b"{not json").await.unwrap_err();

        assert!(matches!(err, HandlerError::Malformed(_)));
        assert!(broker.published(queues::REPORTS).is_empty());
    }

    #[tokio::test]
    async fn other_kinds_are_ignored() {
        let (broker, handler) = setup().await;

        handler
            .handle(br#"{"event": "notification_arrived", "order_id": "b"}"#)
            .await
            .unwrap();
        handler
            .handle(br#"{"event": "payment_received", "amount": 3}"#)
            .await
            .unwrap();

        assert!(broker.published(queues::REPORTS).is_empty());
    }

    #[tokio::test]
    async fn failed_publish_is_transient() {
        let (broker, handler) = setup().await;
        broker.fail_next_publishes(1);

        let err = handler.handle(&bulk_purchase("batch-1")).await.unwrap_err();
        assert!(err.is_transient());

        handler.handle(&bulk_purchase("batch-1")).await.unwrap();
        assert_eq!(broker.published(queues::REPORTS).len(), 1);
    }
}
