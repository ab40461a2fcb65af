//! Connect-with-retry for brokers that may not be up yet.
//!
//! Services start before (or while) the broker is reachable. Rather than fail
//! fast, [`connect_with_retry`] keeps retrying until it succeeds, sleeping
//! between attempts according to a [`RetryPolicy`]. The only way out without a
//! connection is a shutdown signal.
//!
//! # Example
//!
//! ```rust
//! use bulk_purchase_runtime::retry::{RetryPolicy, connect_with_retry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (_shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
//!
//! let connection = connect_with_retry(
//!     &RetryPolicy::fixed(Duration::from_secs(3)),
//!     &mut shutdown_rx,
//!     || async { Ok::<_, String>("connected") },
//! )
//! .await?;
//!
//! assert_eq!(connection, "connected");
//! # Ok(())
//! # }
//! ```

use crate::metrics::BrokerMetrics;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Delay between broker connection attempts unless configured otherwise.
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_retries`: `None` (retry forever)
/// - `initial_delay`: 3 seconds
/// - `max_delay`: 3 seconds
/// - `multiplier`: 1.0 (fixed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts; `None` retries forever
    pub max_retries: Option<usize>,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_CONNECT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Unbounded retries with the same delay every time.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt)
    /// Capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = attempt.min(i32::MAX as usize) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub fn allows(&self, attempt: usize) -> bool {
        self.max_retries.is_none_or(|max| attempt <= max)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let initial_delay = self.initial_delay.unwrap_or(DEFAULT_CONNECT_RETRY_DELAY);
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay,
            max_delay: self.max_delay.unwrap_or(initial_delay),
            multiplier: self.multiplier.unwrap_or(1.0),
        }
    }
}

/// Why [`connect_with_retry`] returned without a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectAborted {
    /// Shutdown was requested while waiting to retry
    #[error("Connection attempts aborted by shutdown after {attempts} attempts")]
    Shutdown {
        /// Attempts made before shutdown
        attempts: usize,
    },

    /// A bounded policy ran out of retries
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: usize,
        /// The last connection error
        last_error: String,
    },
}

/// Connect, retrying until success or shutdown.
///
/// Every failed attempt is logged at `warn` together with the delay before the
/// next one. With an unbounded policy (the default) this only returns an error
/// when `shutdown` fires; a closed shutdown channel counts as a shutdown.
///
/// # Errors
///
/// Returns [`ConnectAborted::Shutdown`] if shutdown is signalled, or
/// [`ConnectAborted::Exhausted`] if a bounded policy runs out of retries.
pub async fn connect_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    shutdown: &mut broadcast::Receiver<()>,
    mut connect: F,
) -> Result<T, ConnectAborted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        BrokerMetrics::record_connect_attempt();

        let error = match connect().await {
            Ok(connection) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Connected after retry");
                }
                return Ok(connection);
            }
            Err(error) => error,
        };

        attempt += 1;
        if !policy.allows(attempt) {
            tracing::error!(attempts = attempt, error = %error, "Giving up on broker connection");
            return Err(ConnectAborted::Exhausted {
                attempts: attempt,
                last_error: error.to_string(),
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis(),
            error = %error,
            "Broker not ready, retrying"
        );

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(attempts = attempt, "Shutdown requested, abandoning broker connection");
                return Err(ConnectAborted::Shutdown { attempts: attempt });
            }
            () = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_policy_is_fixed_three_seconds_forever() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, None);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_secs(3));
        assert!(policy.allows(usize::MAX));
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        // 1000ms * 10^5 = 100,000,000ms, but capped at 2000ms
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn connects_on_first_try() {
        let (_tx, mut rx) = broadcast::channel(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = connect_with_retry(&RetryPolicy::default(), &mut rx, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_retrying_until_broker_recovers() {
        let (_tx, mut rx) = broadcast::channel(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = connect_with_retry(&RetryPolicy::default(), &mut rx, || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 25 {
                    Err(format!("attempt {attempt}: connection refused"))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(counter.load(Ordering::SeqCst), 26);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_the_retry_loop() {
        let (tx, mut rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            connect_with_retry(&RetryPolicy::default(), &mut rx, || async {
                Err::<(), _>("connection refused")
            })
            .await
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(()).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ConnectAborted::Shutdown { attempts }) if attempts >= 1));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_gives_up() {
        let (_tx, mut rx) = broadcast::channel(1);
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(10))
            .build();

        let result = connect_with_retry(&policy, &mut rx, || async {
            Err::<(), _>("connection refused")
        })
        .await;

        assert_eq!(
            result,
            Err(ConnectAborted::Exhausted {
                attempts: 3,
                last_error: "connection refused".to_string(),
            })
        );
    }
}
