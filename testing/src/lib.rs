//! # Bulk Purchase Testing
//!
//! Testing utilities for the bulk purchase pipeline.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a `BrokerClient` with explicit acks, requeue, and outage simulation
//! - [`FixedClock`]: deterministic time
//! - [`SequentialIdGenerator`]: predictable batch ids
//!
//! ## Example
//!
//! ```ignore
//! use bulk_purchase_testing::{InMemoryBroker, SequentialIdGenerator, test_clock};
//!
//! #[tokio::test]
//! async fn flushes_at_threshold() {
//!     let broker = InMemoryBroker::new();
//!     let aggregator = OrderAggregator::builder()
//!         .broker(Arc::new(broker.clone()))
//!         .clock(Arc::new(test_clock()))
//!         .ids(Arc::new(SequentialIdGenerator::new("batch")))
//!         .build()?;
//!     // ...
//!     assert_eq!(broker.published_events("bulk_purchases").len(), 1);
//! }
//! ```

pub mod broker;

pub use broker::InMemoryBroker;

/// Mock implementations of environment traits.
pub mod mocks {
    use bulk_purchase_core::environment::{Clock, IdGenerator};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use bulk_purchase_testing::mocks::FixedClock;
    /// use bulk_purchase_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable ids: `{prefix}-1`, `{prefix}-2`, ...
    #[derive(Debug)]
    pub struct SequentialIdGenerator {
        prefix: String,
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Create a generator whose first id is `{prefix}-1`
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                next: AtomicU64::new(1),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("{}-{n}", self.prefix)
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, SequentialIdGenerator, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_purchase_core::environment::{Clock, IdGenerator};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIdGenerator::new("batch");
        assert_eq!(ids.next_id(), "batch-1");
        assert_eq!(ids.next_id(), "batch-2");
    }
}
