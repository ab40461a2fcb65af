//! In-memory broker for fast, deterministic tests.
//!
//! [`InMemoryBroker`] implements [`BrokerClient`] with the semantics the
//! pipeline relies on:
//!
//! - Queues must be declared before use; declaring is idempotent
//! - Competing consumers: each message goes to exactly one subscriber
//! - FIFO per queue; a requeued message returns to the head, flagged `redelivered`
//! - Nothing is removed until the consumer acks
//!
//! It also records every published payload and can simulate a broker outage
//! or failing publishes.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use bulk_purchase_core::broker::{AckDecision, BrokerClient, BrokerError, Delivery, DeliveryStream};
use bulk_purchase_core::event::{Event, PipelineEvent, SerializedEvent};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct Queued {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Queued>,
    history: Vec<Vec<u8>>,
    acked: usize,
    requeued: usize,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    available: AtomicBool,
    declarations: AtomicUsize,
    failing_publishes: AtomicUsize,
}

impl Inner {
    fn pop(&self, queue: &str) -> Option<Queued> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(|state| state.ready.pop_front())
    }

    /// Put back a message that never reached a subscriber.
    fn restore(&self, queue: &str, message: Queued) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(state) = queues.get_mut(queue) {
            state.ready.push_front(message);
            state.notify.notify_one();
        }
    }

    fn settle(&self, queue: &str, payload: Vec<u8>, decision: AckDecision) {
        let mut queues = self.queues.lock().unwrap();
        let Some(state) = queues.get_mut(queue) else {
            return;
        };

        match decision {
            AckDecision::Ack => state.acked += 1,
            AckDecision::Requeue => {
                state.requeued += 1;
                state.ready.push_front(Queued {
                    payload,
                    redelivered: true,
                });
                state.notify.notify_one();
            }
        }
    }
}

/// In-memory implementation of [`BrokerClient`].
///
/// Cloning yields another handle to the same broker, so a test can keep one
/// handle for assertions while services own `Arc<dyn BrokerClient>` clones.
///
/// # Example
///
/// ```
/// use bulk_purchase_testing::InMemoryBroker;
/// use bulk_purchase_core::broker::BrokerClient;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// broker.declare_queue("reports").await.unwrap();
/// broker.declare_queue("reports").await.unwrap();
///
/// assert_eq!(broker.queue_names(), vec!["reports".to_string()]);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty, available broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                declarations: AtomicUsize::new(0),
                failing_publishes: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a client connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] while the broker is marked unavailable.
    pub fn connect(&self) -> Result<Self, BrokerError> {
        if self.is_available() {
            Ok(self.clone())
        } else {
            Err(BrokerError::ConnectionFailed(
                "in-memory broker is unavailable".to_string(),
            ))
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    ///
    /// Going unavailable ends every open subscription with a transport error.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        if !available {
            for state in self.inner.queues.lock().unwrap().values() {
                state.notify.notify_waiters();
            }
        }
    }

    /// Whether the broker currently accepts connections.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Enqueue a raw payload, bypassing event encoding.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownQueue`] if the queue was never declared.
    pub fn publish_raw(&self, queue: &str, payload: impl Into<Vec<u8>>) -> Result<(), BrokerError> {
        let payload = payload.into();
        let mut queues = self.inner.queues.lock().unwrap();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        state.history.push(payload.clone());
        state.ready.push_back(Queued {
            payload,
            redelivered: false,
        });
        state.notify.notify_one();
        Ok(())
    }

    /// Names of all declared queues, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of `declare_queue` calls made, including repeats.
    #[must_use]
    pub fn declarations(&self) -> usize {
        self.inner.declarations.load(Ordering::SeqCst)
    }

    /// Every payload ever published to `queue`, in publish order.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Published payloads of `queue` that decode as [`PipelineEvent`]s.
    #[must_use]
    pub fn published_events(&self, queue: &str) -> Vec<PipelineEvent> {
        self.published(queue)
            .iter()
            .filter_map(|payload| PipelineEvent::from_bytes(payload).ok())
            .collect()
    }

    /// Messages waiting for delivery on `queue`.
    #[must_use]
    pub fn ready(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.ready.len())
    }

    /// Messages acked on `queue`.
    #[must_use]
    pub fn acked(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.acked)
    }

    /// Messages requeued on `queue`.
    #[must_use]
    pub fn requeued(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.requeued)
    }

    /// Poll until `queue` has at least `count` acks, or the timeout passes.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_acks(&self, queue: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.acked(queue) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn with_queue(&self, queue: &str, f: impl FnOnce(&QueueState) -> usize) -> usize {
        self.inner.queues.lock().unwrap().get(queue).map_or(0, f)
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::TransportError(
                "in-memory broker is unavailable".to_string(),
            ))
        }
    }
}

impl BrokerClient for InMemoryBroker {
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            self.check_available()
                .map_err(|e| BrokerError::DeclareFailed {
                    queue: queue.clone(),
                    reason: e.to_string(),
                })?;

            self.inner.declarations.fetch_add(1, Ordering::SeqCst);
            self.inner.queues.lock().unwrap().entry(queue).or_default();
            Ok(())
        })
    }

    fn publish(
        &self,
        queue: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        let data = event.data.clone();

        Box::pin(async move {
            let publish_failed = |reason: String| BrokerError::PublishFailed {
                queue: queue.clone(),
                reason,
            };

            self.check_available().map_err(|e| publish_failed(e.to_string()))?;

            let injected_failure = self
                .inner
                .failing_publishes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected_failure {
                return Err(publish_failed("injected publish failure".to_string()));
            }

            self.publish_raw(&queue, data)
        })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let subscription_failed = |reason: String| BrokerError::SubscriptionFailed {
                queue: queue.clone(),
                reason,
            };

            self.check_available()
                .map_err(|e| subscription_failed(e.to_string()))?;

            let notify = self
                .inner
                .queues
                .lock()
                .unwrap()
                .get(&queue)
                .map(|state| Arc::clone(&state.notify))
                .ok_or_else(|| subscription_failed("queue not declared".to_string()))?;

            let inner = Arc::clone(&self.inner);

            // One delivery in flight at a time; the verdict is settled before
            // the next pop, so a requeued message is the next one handed out.
            let (tx, mut rx) = tokio::sync::mpsc::channel(1);

            tokio::spawn(async move {
                loop {
                    if !inner.available.load(Ordering::SeqCst) {
                        let _ = tx
                            .send(Err(BrokerError::TransportError(
                                "in-memory broker is unavailable".to_string(),
                            )))
                            .await;
                        break;
                    }

                    let Some(next) = inner.pop(&queue) else {
                        tokio::select! {
                            () = notify.notified() => continue,
                            () = tx.closed() => break,
                        }
                    };

                    let (delivery, pending) =
                        Delivery::new(queue.clone(), next.payload.clone(), next.redelivered);

                    if tx.send(Ok(delivery)).await.is_err() {
                        inner.restore(&queue, next);
                        break;
                    }

                    let decision = pending.decision().await;
                    inner.settle(&queue, next.payload, decision);
                }
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
