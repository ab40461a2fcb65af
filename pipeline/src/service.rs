//! Process lifecycle shared by the service binaries.
//!
//! Every service follows the same shape:
//!
//! 1. **Startup**: connect to the broker (retrying until it is reachable) and
//!    declare the queues the service touches
//! 2. **Runtime**: run the HTTP server or a [`QueueConsumer`]
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, broadcast shutdown and wait for
//!    background tasks, bounded by the configured timeout

use crate::config::Config;
use bulk_purchase_core::broker::{BrokerClient, BrokerError};
use bulk_purchase_runtime::{MessageHandler, QueueConsumer, shutdown};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Broadcast shutdown once a signal arrives.
pub fn spawn_signal_forwarder(shutdown_tx: broadcast::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        // No receivers left means everything already stopped.
        let _ = shutdown_tx.send(());
    })
}

/// A consumer process: which queue it drains and what it does with each message.
pub struct ConsumerService {
    /// Name used in logs and metric labels
    pub name: &'static str,
    /// Queue consumed
    pub queue: &'static str,
    /// Queues published to, declared before consuming starts
    pub publishes_to: &'static [&'static str],
    /// Per-message work
    pub handler: Arc<dyn MessageHandler>,
}

impl ConsumerService {
    /// Declare queues, consume until shutdown, then drain the consumer task.
    ///
    /// `shutdown_rx` must be subscribed before the broker connection is made,
    /// so a signal that arrives during startup is not lost.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclareFailed`] if a queue cannot be declared.
    pub async fn run(
        self,
        broker: Arc<dyn BrokerClient>,
        config: &Config,
        shutdown_tx: &broadcast::Sender<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), BrokerError> {
        for queue in self.publishes_to {
            tokio::select! {
                result = broker.declare_queue(queue) => result?,
                _ = shutdown_rx.recv() => {
                    info!(service = self.name, "Shutdown requested during startup");
                    return Ok(());
                }
            }
        }

        let consumer_rx = shutdown_tx.subscribe();
        if shutdown_pending(&mut shutdown_rx) {
            info!(service = self.name, "Shutdown requested during startup");
            return Ok(());
        }

        let consumer = QueueConsumer::new(self.name, self.queue, broker, self.handler, consumer_rx)
            .with_retry_delay(config.consumer.retry_delay());
        let handle = consumer.spawn();

        info!(service = self.name, queue = self.queue, "Consumer running");

        // A closed channel also means shutdown.
        let _ = shutdown_rx.recv().await;

        info!(service = self.name, "Draining consumer");
        shutdown::await_tasks(vec![(self.name.to_string(), handle)], config.server.shutdown_timeout()).await;
        Ok(())
    }
}

fn shutdown_pending(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
}

/// Connect to Redpanda, retrying at the configured interval until it answers.
///
/// # Errors
///
/// Returns [`ConnectAborted`](bulk_purchase_runtime::ConnectAborted) if
/// shutdown is requested before a connection is made.
#[cfg(feature = "redpanda")]
pub async fn connect_broker(
    config: &crate::config::BrokerConfig,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<bulk_purchase_redpanda::RedpandaBroker, bulk_purchase_runtime::ConnectAborted> {
    use bulk_purchase_redpanda::RedpandaBroker;
    use bulk_purchase_runtime::{RetryPolicy, connect_with_retry};

    let builder = RedpandaBroker::builder()
        .brokers(&config.url)
        .consumer_group_prefix(&config.consumer_group_prefix)
        .auto_offset_reset(&config.auto_offset_reset)
        .timeout(config.publish_timeout());

    info!(brokers = %config.url, "Connecting to broker");
    let policy = RetryPolicy::fixed(config.connect_retry_delay());
    let broker = connect_with_retry(&policy, shutdown_rx, || builder.clone().connect()).await?;
    info!(brokers = %config.url, "Broker connected");
    Ok(broker)
}
