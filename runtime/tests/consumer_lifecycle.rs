//! Consumer lifecycle against the in-memory broker: connect with retry,
//! consume, survive an outage, shut down.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use bulk_purchase_core::broker::BrokerClient;
use bulk_purchase_runtime::shutdown::await_tasks;
use bulk_purchase_runtime::{HandlerError, MessageHandler, QueueConsumer, RetryPolicy, connect_with_retry};
use bulk_purchase_testing::InMemoryBroker;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

struct CountingHandler(AtomicUsize);

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn consumer_waits_for_broker_then_drains_queue() {
    let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let broker = InMemoryBroker::new();
    broker.set_available(false);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(4);

    let recovering = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        recovering.set_available(true);
    });

    let connected = connect_with_retry(
        &RetryPolicy::fixed(Duration::from_millis(10)),
        &mut shutdown_rx,
        || async { broker.connect() },
    )
    .await
    .unwrap();

    connected.declare_queue("jobs").await.unwrap();
    for n in 0..5 {
        broker.publish_raw("jobs", format!("job-{n}")).unwrap();
    }

    let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
    let consumer = QueueConsumer::new(
        "jobs-consumer",
        "jobs",
        Arc::new(connected),
        Arc::clone(&handler) as Arc<dyn MessageHandler>,
        shutdown_tx.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(10));
    let handle = consumer.spawn();

    assert!(broker.wait_for_acks("jobs", 5, Duration::from_secs(5)).await);
    assert_eq!(handler.0.load(Ordering::SeqCst), 5);
    assert_eq!(broker.ready("jobs"), 0);

    shutdown_tx.send(()).unwrap();
    let stopped = await_tasks(vec![("jobs-consumer".to_string(), handle)], Duration::from_secs(5)).await;
    assert_eq!(stopped, 1);
}
