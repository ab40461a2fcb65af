//! Threshold-triggered order aggregation.
//!
//! [`OrderAggregator`] keeps one bucket of [`OrderLine`]s per provider. When an
//! append brings a bucket to the threshold, the first `threshold` lines are
//! detached as a batch while the provider's shard lock is still held, then
//! published to `bulk_purchases` after the lock is released. Two racing
//! submissions can therefore never flush the same lines.
//!
//! A failed publish returns the batch to the front of its bucket; the next
//! submission for that provider flushes it again.
//!
//! # Example
//!
//! ```ignore
//! let aggregator = OrderAggregator::builder()
//!     .broker(broker)
//!     .threshold(10)
//!     .build()?;
//!
//! let receipt = aggregator
//!     .submit_order(&OrderRequest::new("P1", "X", 1))
//!     .await?;
//! assert_eq!(receipt.buffered, 1);
//! ```

use bulk_purchase_core::DEFAULT_ORDER_THRESHOLD;
use bulk_purchase_core::broker::{BrokerClient, BrokerError, publish_event};
use bulk_purchase_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use bulk_purchase_core::event::{BulkPurchaseEvent, PipelineEvent};
use bulk_purchase_core::order::{OrderRequest, ValidatedOrder, ValidationError};
use bulk_purchase_core::queues;
use bulk_purchase_core::types::{BatchId, OrderLine, ProviderId};
use bulk_purchase_runtime::metrics::AggregatorMetrics;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors from building or using an [`OrderAggregator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// The submission was rejected; no bucket was touched
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A threshold of zero would flush empty batches forever
    #[error("Order threshold must be at least 1")]
    InvalidThreshold,

    /// The builder was not given a broker
    #[error("No broker configured for the aggregator")]
    MissingBroker,
}

/// What happened to the batches a submission detached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every detached batch was published
    Published {
        /// Ids of the published batches, in publish order
        batch_ids: Vec<BatchId>,
    },
    /// A publish failed; the unpublished batches are buffered again
    Deferred {
        /// Batches published before the failure
        published: Vec<BatchId>,
        /// Batches returned to the bucket
        pending_batches: usize,
    },
}

impl FlushOutcome {
    /// Ids of the batches that reached the broker.
    #[must_use]
    pub fn published(&self) -> &[BatchId] {
        match self {
            Self::Published { batch_ids } => batch_ids,
            Self::Deferred { published, .. } => published,
        }
    }

    /// Whether any batch is waiting for a retry.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Result of an accepted submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Provider whose bucket received the line
    pub provider_id: ProviderId,
    /// Lines left in the bucket after this submission
    pub buffered: usize,
    /// Present when the submission filled the bucket
    pub flush: Option<FlushOutcome>,
}

/// Per-provider order buffers that flush as bulk purchases.
pub struct OrderAggregator {
    buckets: DashMap<ProviderId, Vec<OrderLine>>,
    threshold: usize,
    broker: Arc<dyn BrokerClient>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl OrderAggregator {
    /// Start building an aggregator.
    #[must_use]
    pub fn builder() -> OrderAggregatorBuilder {
        OrderAggregatorBuilder::default()
    }

    /// Lines per provider that trigger a flush.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Declare the queue this aggregator publishes to.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclareFailed`] if the broker rejects the declaration.
    pub async fn declare_queues(&self) -> Result<(), BrokerError> {
        self.broker.declare_queue(queues::BULK_PURCHASES).await
    }

    /// Validate an order, buffer it, and publish any batch it completes.
    ///
    /// A publish failure does not fail the submission: the order is already
    /// buffered, and the receipt reports the flush as deferred.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Validation`] if the request is incomplete or
    /// its quantity is out of range. Nothing is buffered in that case.
    pub async fn submit_order(&self, request: &OrderRequest) -> Result<SubmitReceipt, AggregatorError> {
        let order = match request.validate() {
            Ok(order) => order,
            Err(e) => {
                AggregatorMetrics::record_rejected();
                debug!(error = %e, "Order rejected");
                return Err(e.into());
            }
        };
        AggregatorMetrics::record_accepted();

        let provider_id = order.provider_id.clone();
        let (buffered, batches) = self.append(order);

        let (buffered, flush) = if batches.is_empty() {
            (buffered, None)
        } else {
            let outcome = self.flush(&provider_id, batches).await;
            // A deferred batch is back in the bucket.
            let buffered = if outcome.is_deferred() {
                self.bucket_len(&provider_id)
            } else {
                self.buckets.remove_if(&provider_id, |_, bucket| bucket.is_empty());
                buffered
            };
            (buffered, Some(outcome))
        };

        Ok(SubmitReceipt {
            provider_id,
            buffered,
            flush,
        })
    }

    /// Buffered line counts for every provider with a non-empty bucket.
    ///
    /// Counts stay below the threshold except for a provider whose flush was
    /// deferred: its unpublished lines sit at the front of the bucket until
    /// the next flush succeeds, so the count can reach or exceed it.
    #[must_use]
    pub fn pending(&self) -> BTreeMap<ProviderId, usize> {
        self.buckets
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    /// Total buffered lines across all providers.
    #[must_use]
    pub fn buffered_lines(&self) -> usize {
        self.buckets.iter().map(|entry| entry.value().len()).sum()
    }

    fn bucket_len(&self, provider_id: &ProviderId) -> usize {
        self.buckets.get(provider_id).map_or(0, |bucket| bucket.len())
    }

    /// Push a line and detach every full batch, under the provider's shard lock.
    fn append(&self, order: ValidatedOrder) -> (usize, Vec<BulkPurchaseEvent>) {
        let mut bucket = self.buckets.entry(order.provider_id.clone()).or_default();
        bucket.push(order.line);

        let mut batches = Vec::new();
        while bucket.len() >= self.threshold {
            batches.push(BulkPurchaseEvent {
                batch_id: Some(BatchId::new(self.ids.next_id())),
                provider_id: order.provider_id.clone(),
                orders: bucket.drain(..self.threshold).collect(),
                flushed_at: Some(self.clock.now()),
            });
        }

        (bucket.len(), batches)
    }

    async fn flush(&self, provider_id: &ProviderId, batches: Vec<BulkPurchaseEvent>) -> FlushOutcome {
        let mut published = Vec::with_capacity(batches.len());
        let mut remaining = batches.into_iter();

        while let Some(batch) = remaining.next() {
            let lines = batch.orders.len();
            let event = PipelineEvent::BulkPurchase(batch.clone());

            match publish_event(self.broker.as_ref(), queues::BULK_PURCHASES, &event).await {
                Ok(()) => {
                    AggregatorMetrics::record_published(lines);
                    info!(
                        provider_id = %provider_id,
                        batch_id = batch.batch_id.as_ref().map(BatchId::as_str),
                        lines,
                        "Bulk purchase published"
                    );
                    published.extend(batch.batch_id);
                }
                Err(e) => {
                    AggregatorMetrics::record_publish_failure();
                    let deferred: Vec<BulkPurchaseEvent> = std::iter::once(batch).chain(remaining).collect();
                    let pending_batches = deferred.len();
                    error!(
                        provider_id = %provider_id,
                        pending_batches,
                        error = %e,
                        "Bulk purchase publish failed; batch returned to bucket"
                    );
                    self.rebuffer(provider_id, deferred);
                    return FlushOutcome::Deferred {
                        published,
                        pending_batches,
                    };
                }
            }
        }

        FlushOutcome::Published { batch_ids: published }
    }

    /// Put unpublished batches back at the front of the bucket, oldest first.
    fn rebuffer(&self, provider_id: &ProviderId, batches: Vec<BulkPurchaseEvent>) {
        let lines: Vec<OrderLine> = batches.into_iter().flat_map(|batch| batch.orders).collect();
        let mut bucket = self.buckets.entry(provider_id.clone()).or_default();
        let newer = std::mem::replace(&mut *bucket, lines);
        bucket.extend(newer);
    }
}

impl std::fmt::Debug for OrderAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderAggregator")
            .field("threshold", &self.threshold)
            .field("providers", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`OrderAggregator`].
///
/// Only the broker is required. The clock and id generator default to the
/// system clock and UUID v4 ids; the threshold defaults to
/// [`DEFAULT_ORDER_THRESHOLD`].
#[derive(Default)]
pub struct OrderAggregatorBuilder {
    broker: Option<Arc<dyn BrokerClient>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    threshold: Option<usize>,
}

impl OrderAggregatorBuilder {
    /// Broker that receives bulk purchases
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn BrokerClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Clock stamping `flushed_at`
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Source of batch ids
    #[must_use]
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Lines per provider that trigger a flush
    #[must_use]
    pub const fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Build the aggregator.
    ///
    /// # Errors
    ///
    /// - [`AggregatorError::MissingBroker`] if no broker was set
    /// - [`AggregatorError::InvalidThreshold`] if the threshold is zero
    pub fn build(self) -> Result<OrderAggregator, AggregatorError> {
        let broker = self.broker.ok_or(AggregatorError::MissingBroker)?;
        let threshold = self.threshold.unwrap_or(DEFAULT_ORDER_THRESHOLD);
        if threshold == 0 {
            return Err(AggregatorError::InvalidThreshold);
        }

        Ok(OrderAggregator {
            buckets: DashMap::new(),
            threshold,
            broker,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidGenerator)),
        })
    }
}
