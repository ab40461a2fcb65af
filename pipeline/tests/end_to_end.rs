//! Aggregator → notifier → reporter over the in-memory broker.

#![allow(clippy::unwrap_used)]

use bulk_purchase_core::broker::BrokerClient;
use bulk_purchase_core::environment::Clock;
use bulk_purchase_core::event::{BulkPurchaseEvent, Event, NotificationEvent, PipelineEvent};
use bulk_purchase_core::order::OrderRequest;
use bulk_purchase_core::queues;
use bulk_purchase_core::types::{BatchId, OrderLine, ProductId, ProviderId};
use bulk_purchase_pipeline::OrderAggregator;
use bulk_purchase_pipeline::stages::{BulkPurchaseHandler, MemoryReportSink, ReportHandler};
use bulk_purchase_runtime::QueueConsumer;
use bulk_purchase_runtime::shutdown::await_tasks;
use bulk_purchase_testing::{InMemoryBroker, SequentialIdGenerator, test_clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Pipeline {
    broker: InMemoryBroker,
    aggregator: OrderAggregator,
    sink: Arc<MemoryReportSink>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(String, tokio::task::JoinHandle<()>)>,
}

async fn start_pipeline(threshold: usize) -> Pipeline {
    let broker = InMemoryBroker::new();
    let client: Arc<dyn BrokerClient> = Arc::new(broker.clone());
    for queue in [queues::BULK_PURCHASES, queues::REPORTS] {
        broker.declare_queue(queue).await.unwrap();
    }

    let aggregator = OrderAggregator::builder()
        .broker(Arc::clone(&client))
        .clock(Arc::new(test_clock()))
        .ids(Arc::new(SequentialIdGenerator::new("batch")))
        .threshold(threshold)
        .build()
        .unwrap();

    let sink = Arc::new(MemoryReportSink::new());
    let (shutdown, _) = broadcast::channel(1);

    let notifier = QueueConsumer::new(
        "notifier",
        queues::BULK_PURCHASES,
        Arc::clone(&client),
        Arc::new(BulkPurchaseHandler::new(Arc::clone(&client))),
        shutdown.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(20));

    let reporter = QueueConsumer::new(
        "reporter",
        queues::REPORTS,
        Arc::clone(&client),
        Arc::new(ReportHandler::new(sink.clone())),
        shutdown.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(20));

    let tasks = vec![
        ("notifier".to_string(), notifier.spawn()),
        ("reporter".to_string(), reporter.spawn()),
    ];

    Pipeline {
        broker,
        aggregator,
        sink,
        shutdown,
        tasks,
    }
}

impl Pipeline {
    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        assert_eq!(await_tasks(self.tasks, Duration::from_secs(2)).await, 2);
    }
}

#[tokio::test]
async fn orders_flow_through_to_reports() {
    let pipeline = start_pipeline(10).await;

    for _ in 0..25 {
        pipeline
            .aggregator
            .submit_order(&OrderRequest::new("P1", "X", 1))
            .await
            .unwrap();
    }

    assert!(
        pipeline
            .broker
            .wait_for_acks(queues::REPORTS, 2, Duration::from_secs(2))
            .await
    );
    assert_eq!(
        pipeline.sink.lines(),
        vec![
            "Your order with ID batch-1 has arrived",
            "Your order with ID batch-2 has arrived",
        ]
    );
    assert!(
        pipeline
            .broker
            .wait_for_acks(queues::BULK_PURCHASES, 2, Duration::from_secs(2))
            .await
    );

    pipeline.stop().await;
}

#[tokio::test]
async fn malformed_messages_do_not_stall_the_pipeline() {
    let pipeline = start_pipeline(2).await;

    pipeline
        .broker
        .publish_raw(queues::BULK_PURCHASES, b"{\"event\": \"bulk_purchase\"".to_vec())
        .unwrap();
    pipeline
        .broker
        .publish_raw(queues::REPORTS, b"garbage".to_vec())
        .unwrap();
    pipeline
        .broker
        .publish_raw(queues::REPORTS, br#"{"event":"order_shipped","order_id":"o"}"#.to_vec())
        .unwrap();

    for _ in 0..2 {
        pipeline
            .aggregator
            .submit_order(&OrderRequest::new("P9", "Y", 4))
            .await
            .unwrap();
    }

    assert!(
        pipeline
            .broker
            .wait_for_acks(queues::REPORTS, 3, Duration::from_secs(2))
            .await
    );
    assert_eq!(pipeline.sink.lines(), vec!["Your order with ID batch-1 has arrived"]);
    assert!(
        pipeline
            .broker
            .wait_for_acks(queues::BULK_PURCHASES, 2, Duration::from_secs(2))
            .await
    );

    pipeline.stop().await;
}

#[tokio::test]
async fn failed_notification_publish_is_redelivered() {
    let pipeline = start_pipeline(1).await;

    // Raw publishes bypass failure injection, so only the notifier's publish fails.
    pipeline.broker.fail_next_publishes(1);
    let purchase = PipelineEvent::BulkPurchase(BulkPurchaseEvent {
        batch_id: Some(BatchId::new("batch-42")),
        provider_id: ProviderId::new("P1"),
        orders: vec![OrderLine::new(ProductId::new("X"), 1)],
        flushed_at: Some(test_clock().now()),
    });
    pipeline
        .broker
        .publish_raw(queues::BULK_PURCHASES, purchase.to_bytes().unwrap())
        .unwrap();

    assert!(
        pipeline
            .broker
            .wait_for_acks(queues::REPORTS, 1, Duration::from_secs(2))
            .await
    );
    assert_eq!(pipeline.broker.requeued(queues::BULK_PURCHASES), 1);
    assert_eq!(
        pipeline.broker.published_events(queues::REPORTS),
        vec![PipelineEvent::NotificationArrived(NotificationEvent {
            order_id: BatchId::new("batch-42"),
        })]
    );
    assert_eq!(pipeline.sink.lines(), vec!["Your order with ID batch-42 has arrived"]);

    pipeline.stop().await;
}
