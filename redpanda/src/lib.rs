//! Redpanda broker client for the bulk purchase pipeline.
//!
//! This crate provides [`RedpandaBroker`], an implementation of the
//! [`BrokerClient`] trait from `bulk-purchase-core` on top of rdkafka. Any
//! Kafka-compatible cluster works (Redpanda, Apache Kafka, MSK).
//!
//! # Queue Mapping
//!
//! | Broker concept | Kafka concept |
//! |----------------|---------------|
//! | queue | topic (created through the admin API) |
//! | competing consumers | one consumer group per queue: `{prefix}-{queue}` |
//! | ack | offset commit |
//! | requeue | seek back to the message's offset |
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Each message is handed out as a [`Delivery`]; the forwarding task waits
//!   for its verdict before fetching the next one
//! - The offset is committed only after the consumer acks
//! - A requeued (or dropped) delivery seeks the partition back, so the same
//!   message is fetched again with `redelivered` set
//! - If the process crashes before commit, the message is redelivered
//!
//! # Example
//!
//! ```no_run
//! use bulk_purchase_redpanda::RedpandaBroker;
//! use bulk_purchase_core::broker::BrokerClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group_prefix("bulk-purchase")
//!     .connect()
//!     .await?;
//!
//! broker.declare_queue("bulk_purchases").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use bulk_purchase_core::broker::{AckDecision, BrokerClient, BrokerError, Delivery, DeliveryStream};
use bulk_purchase_core::event::SerializedEvent;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redpanda-backed [`BrokerClient`].
///
/// One instance holds a producer and an admin client and is shared by every
/// publisher in the process. Each `subscribe` call creates its own consumer.
pub struct RedpandaBroker {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Admin client for declaring topics
    admin: AdminClient<DefaultClientContext>,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer and admin operation timeout
    timeout: Duration,
    /// Consumer group prefix; the group for a queue is `{prefix}-{queue}`
    group_prefix: String,
    /// Auto offset reset policy for new consumer groups
    auto_offset_reset: String,
    /// Partitions per declared topic
    partitions: i32,
    /// Replication factor per declared topic
    replication: i32,
}

impl RedpandaBroker {
    /// Create a new builder for configuring the broker client.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for `queue`.
    #[must_use]
    pub fn consumer_group(&self, queue: &str) -> String {
        format!("{}-{queue}", self.group_prefix)
    }

    /// Check that the cluster answers a metadata request.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no broker responds within the timeout.
    pub async fn probe(&self) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Metadata probe panicked: {e}")))?
        .map_err(|e| BrokerError::ConnectionFailed(format!("Metadata request failed: {e}")))?;

        tracing::info!(brokers = %self.brokers, cluster_size = brokers, "Connected to broker");
        Ok(())
    }
}

/// Builder for configuring a [`RedpandaBroker`].
///
/// # Example
///
/// ```no_run
/// use bulk_purchase_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    group_prefix: Option<String>,
    auto_offset_reset: Option<String>,
    partitions: Option<i32>,
    replication: Option<i32>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send and admin operation timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group prefix.
    ///
    /// Every instance of a service uses the same group for a queue, so they
    /// compete for its messages.
    ///
    /// Default: "bulk-purchase"
    #[must_use]
    pub fn consumer_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Set where new consumer groups start reading: "earliest" or "latest".
    ///
    /// Default: "earliest", so messages published before the first consumer
    /// started are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the partition count and replication factor for declared topics.
    ///
    /// Default: 1 partition, replication 1
    #[must_use]
    pub const fn topic_layout(mut self, partitions: i32, replication: i32) -> Self {
        self.partitions = Some(partitions);
        self.replication = Some(replication);
        self
    }

    /// Build the [`RedpandaBroker`] without contacting the cluster.
    ///
    /// rdkafka connects lazily, so this succeeds even if no broker is up.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// client configuration is invalid.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        let group_prefix = self
            .group_prefix
            .unwrap_or_else(|| "bulk-purchase".to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::debug!(
            brokers = %brokers,
            acks,
            compression,
            group_prefix = %group_prefix,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker configured"
        );

        Ok(RedpandaBroker {
            producer,
            admin,
            brokers,
            timeout,
            group_prefix,
            auto_offset_reset,
            partitions: self.partitions.unwrap_or(1),
            replication: self.replication.unwrap_or(1),
        })
    }

    /// Build the broker and verify the cluster is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the client cannot be built or
    /// the cluster does not answer a metadata request.
    pub async fn connect(self) -> Result<RedpandaBroker, BrokerError> {
        let broker = self.build()?;
        broker.probe().await?;
        Ok(broker)
    }
}

impl BrokerClient for RedpandaBroker {
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let declare_failed = |reason: String| BrokerError::DeclareFailed {
                queue: queue.clone(),
                reason,
            };

            let topic = NewTopic::new(&queue, self.partitions, TopicReplication::Fixed(self.replication));
            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = self
                .admin
                .create_topics(&[topic], &options)
                .await
                .map_err(|e| declare_failed(e.to_string()))?;

            for result in results {
                match result {
                    Ok(name) => tracing::info!(queue = %name, "Queue declared"),
                    Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(queue = %name, "Queue already exists");
                    }
                    Err((_, code)) => return Err(declare_failed(code.to_string())),
                }
            }

            Ok(())
        })
    }

    fn publish(
        &self,
        queue: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        let event = event.clone();

        Box::pin(async move {
            // Same event type, same partition
            let record = FutureRecord::to(&queue)
                .payload(&event.data)
                .key(event.event_type.as_bytes());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        queue = %queue,
                        partition,
                        offset,
                        event_type = %event.event_type,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(queue = %queue, error = %kafka_error, "Failed to publish message");
                    Err(BrokerError::PublishFailed {
                        queue,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        let group = self.consumer_group(&queue);
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let seek_timeout = self.timeout;

        Box::pin(async move {
            let subscription_failed = |reason: String| BrokerError::SubscriptionFailed {
                queue: queue.clone(),
                reason,
            };

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false") // Commit on ack only
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| subscription_failed(format!("Failed to subscribe: {e}")))?;

            tracing::info!(queue = %queue, consumer_group = %group, "Subscribed to queue");

            // One delivery in flight at a time; the task waits for each verdict.
            let (tx, mut rx) = tokio::sync::mpsc::channel(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                let mut requeued: HashSet<(i32, i64)> = HashSet::new();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = BrokerError::TransportError(format!("Failed to receive message: {e}"));
                            let _ = tx.send(Err(err)).await;
                            break;
                        }
                    };

                    let position = (message.partition(), message.offset());
                    let redelivered = requeued.remove(&position);
                    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

                    tracing::trace!(
                        queue = message.topic(),
                        partition = position.0,
                        offset = position.1,
                        redelivered,
                        "Received message"
                    );

                    let (delivery, pending) = Delivery::new(message.topic(), payload, redelivered);
                    let receiver_gone = tx.send(Ok(delivery)).await.is_err();

                    match pending.decision().await {
                        AckDecision::Ack => {
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    partition = position.0,
                                    offset = position.1,
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        AckDecision::Requeue => {
                            requeued.insert(position);
                            if let Err(e) = consumer.seek(
                                message.topic(),
                                position.0,
                                Offset::Offset(position.1),
                                Timeout::After(seek_timeout),
                            ) {
                                tracing::warn!(
                                    partition = position.0,
                                    offset = position.1,
                                    error = %e,
                                    "Failed to seek back for redelivery"
                                );
                            }
                        }
                    }

                    if receiver_gone {
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn build_requires_brokers() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn build_is_lazy_and_applies_defaults() {
        let broker = RedpandaBroker::builder()
            .brokers("localhost:1")
            .build()
            .unwrap();

        assert_eq!(broker.brokers(), "localhost:1");
        assert_eq!(broker.consumer_group("reports"), "bulk-purchase-reports");
        assert_eq!(broker.auto_offset_reset, "earliest");
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_listens() {
        let result = RedpandaBroker::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(200))
            .connect()
            .await;

        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }
}
