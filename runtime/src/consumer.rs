//! Queue consumer with automatic reconnection.
//!
//! [`QueueConsumer`] owns the subscribe-process-reconnect loop every pipeline
//! consumer needs. Services implement [`MessageHandler`] and hand it to a
//! consumer; the consumer declares the queue, subscribes, settles each
//! delivery according to the handler's result, and resubscribes whenever the
//! stream ends.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     declare + subscribe:
//!         loop {
//!             next delivery:
//!                 - Ok          → ack
//!                 - Malformed   → warn, ack
//!                 - Transient   → error, requeue, pause
//!             shutdown?       → stop
//!         }
//!     stream ended / subscribe failed:
//!         wait retry_delay, then reconnect
//! }
//! ```
//!
//! Shutdown is only observed between deliveries, so the message in flight is
//! always settled before the consumer stops.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = QueueConsumer::new(
//!     "notifier",
//!     queues::BULK_PURCHASES,
//!     broker,
//!     Arc::new(BulkPurchaseHandler::new(broker.clone())),
//!     shutdown_tx.subscribe(),
//! );
//!
//! let handle = consumer.spawn();
//! ```

use crate::handler::{HandlerError, MessageHandler};
use crate::metrics::ConsumerMetrics;
use bulk_purchase_core::broker::{BrokerClient, BrokerError, Delivery, DeliveryStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default pause before resubscribing or after a transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Generic queue consumer.
///
/// # Lifecycle
///
/// 1. Created via `new()`
/// 2. Spawned as background task via `spawn()` (or driven inline via `run()`)
/// 3. Runs until the shutdown signal fires; connection loss is never fatal
pub struct QueueConsumer {
    /// Consumer name (for logging and metrics)
    name: String,

    /// Queue to consume from
    queue: String,

    /// Broker to consume from
    broker: Arc<dyn BrokerClient>,

    /// Handler for processing messages
    handler: Arc<dyn MessageHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Pause on connection failure and after transient handler errors
    retry_delay: Duration,
}

impl QueueConsumer {
    /// Create a new consumer with the default retry delay (3 seconds).
    ///
    /// # Arguments
    ///
    /// * `name` - Consumer name for logging (e.g., "notifier", "reporter")
    /// * `queue` - Queue to consume; it is declared before every subscription
    /// * `broker` - Broker client
    /// * `handler` - Handler that processes messages
    /// * `shutdown` - Broadcast receiver for graceful shutdown
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            broker,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    ///
    /// The returned handle resolves once the shutdown signal has been received.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, queue = %self.queue, "Queue consumer started");

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Queue consumer received shutdown signal");
                    break;
                }
                result = Self::open(self.broker.as_ref(), &self.queue) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, queue = %self.queue, "Subscribed to queue");

                    if self.process_stream(&mut stream).await == StreamEnd::Shutdown {
                        break;
                    }

                    warn!(
                        consumer = %self.name,
                        "Delivery stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to queue, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            if self.pause().await == StreamEnd::Shutdown {
                break;
            }
        }

        info!(consumer = %self.name, "Queue consumer stopped");
    }

    async fn open(broker: &dyn BrokerClient, queue: &str) -> Result<DeliveryStream, BrokerError> {
        broker.declare_queue(queue).await?;
        broker.subscribe(queue).await
    }

    /// Process deliveries until the stream ends or shutdown is signalled.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Queue consumer received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if !self.dispatch(delivery).await && self.pause().await == StreamEnd::Shutdown {
                        return StreamEnd::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving from queue");
                    return StreamEnd::Disconnected;
                }
                None => {
                    warn!(consumer = %self.name, "Delivery stream ended");
                    return StreamEnd::Disconnected;
                }
            }
        }
    }

    /// Run the handler and settle the delivery.
    ///
    /// Returns `false` when the message was requeued.
    async fn dispatch(&self, delivery: Delivery) -> bool {
        match self.handler.handle(delivery.payload()).await {
            Ok(()) => {
                debug!(consumer = %self.name, redelivered = delivery.redelivered(), "Message processed");
                delivery.ack();
                ConsumerMetrics::record(&self.name, "processed");
                true
            }
            Err(HandlerError::Malformed(reason)) => {
                warn!(
                    consumer = %self.name,
                    reason = %reason,
                    payload = %String::from_utf8_lossy(delivery.payload()),
                    "Dropping unprocessable message"
                );
                delivery.ack();
                ConsumerMetrics::record(&self.name, "dropped");
                true
            }
            Err(HandlerError::Transient(reason)) => {
                error!(
                    consumer = %self.name,
                    reason = %reason,
                    "Failed to handle message, requeueing in {:?}",
                    self.retry_delay
                );
                delivery.requeue();
                ConsumerMetrics::record(&self.name, "requeued");
                false
            }
        }
    }

    /// Sleep for the retry delay unless shutdown arrives first.
    async fn pause(&mut self) -> StreamEnd {
        tokio::select! {
            _ = self.shutdown.recv() => {
                info!(consumer = %self.name, "Queue consumer received shutdown signal while waiting");
                StreamEnd::Shutdown
            }
            () = tokio::time::sleep(self.retry_delay) => StreamEnd::Disconnected,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bulk_purchase_testing::InMemoryBroker;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUEUE: &str = "work";
    const WAIT: Duration = Duration::from_secs(5);

    /// Records payloads; fails transiently for the first `transient_failures` calls,
    /// and treats the payload `"bad"` as malformed.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        transient_failures: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
            let text = String::from_utf8_lossy(payload).into_owned();
            if text == "bad" {
                return Err(HandlerError::Malformed("bad payload".into()));
            }
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(HandlerError::Transient("downstream unavailable".into()));
            }
            self.seen.lock().unwrap().push(text);
            Ok(())
        }
    }

    fn consumer(
        broker: &InMemoryBroker,
        handler: Arc<RecordingHandler>,
    ) -> (QueueConsumer, broadcast::Sender<()>) {
        let (tx, rx) = broadcast::channel(1);
        let consumer = QueueConsumer::new("test", QUEUE, Arc::new(broker.clone()), handler, rx)
            .with_retry_delay(Duration::from_millis(20));
        (consumer, tx)
    }

    #[tokio::test]
    async fn declares_queue_and_acks_processed_messages() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(RecordingHandler::default());
        let (consumer, shutdown) = consumer(&broker, Arc::clone(&handler));
        let handle = consumer.spawn();

        // The consumer declares the queue itself; wait for it before publishing.
        for _ in 0..200 {
            if broker.queue_names().contains(&QUEUE.to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        broker.publish_raw(QUEUE, "one").unwrap();
        broker.publish_raw(QUEUE, "two").unwrap();

        assert!(broker.wait_for_acks(QUEUE, 2, WAIT).await);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["one", "two"]);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_message_is_acked_and_consumer_keeps_going() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE).await.unwrap();
        broker.publish_raw(QUEUE, "bad").unwrap();
        broker.publish_raw(QUEUE, "good").unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let (consumer, shutdown) = consumer(&broker, Arc::clone(&handler));
        let handle = consumer.spawn();

        assert!(broker.wait_for_acks(QUEUE, 2, WAIT).await);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["good"]);
        assert_eq!(broker.requeued(QUEUE), 0);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_requeues_then_succeeds() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE).await.unwrap();
        broker.publish_raw(QUEUE, "retry-me").unwrap();

        let handler = Arc::new(RecordingHandler {
            transient_failures: AtomicUsize::new(2),
            ..RecordingHandler::default()
        });
        let (consumer, shutdown) = consumer(&broker, Arc::clone(&handler));
        let handle = consumer.spawn();

        assert!(broker.wait_for_acks(QUEUE, 1, WAIT).await);
        assert_eq!(broker.requeued(QUEUE), 2);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["retry-me"]);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_broker_outage() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE).await.unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let (consumer, shutdown) = consumer(&broker, Arc::clone(&handler));
        let handle = consumer.spawn();

        broker.publish_raw(QUEUE, "before").unwrap();
        assert!(broker.wait_for_acks(QUEUE, 1, WAIT).await);

        broker.set_available(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        broker.set_available(true);

        broker.publish_raw(QUEUE, "after").unwrap();
        assert!(broker.wait_for_acks(QUEUE, 2, WAIT).await);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["before", "after"]);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_idle_consumer() {
        let broker = InMemoryBroker::new();
        let (consumer, shutdown) = consumer(&broker, Arc::new(RecordingHandler::default()));
        assert_eq!(consumer.name(), "test");
        let handle = consumer.spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send(()).unwrap();

        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    }
}
