//! # Bulk Purchase Pipeline
//!
//! The services of the bulk purchase pipeline:
//!
//! ```text
//! POST /aggregate_order
//!        │
//!        ▼
//! ┌─────────────────┐  bulk_purchases  ┌──────────────┐  reports  ┌──────────────┐
//! │ OrderAggregator │ ───────────────► │   notifier   │ ────────► │   reporter   │
//! │ (per-provider   │                  │ (1 notice per│           │ (completion  │
//! │  buckets)       │                  │  batch)      │           │  line)       │
//! └─────────────────┘                  └──────────────┘           └──────────────┘
//! ```
//!
//! Each box runs as its own binary (`aggregator`, `notifier`, `reporter`);
//! `simulate` drives the intake endpoint. Aggregation state lives only in the
//! aggregator's memory and is lost on restart.

pub mod aggregator;
pub mod config;
pub mod server;
pub mod service;
pub mod stages;
pub mod telemetry;

pub use aggregator::{AggregatorError, FlushOutcome, OrderAggregator, SubmitReceipt};
pub use config::{Config, ConfigError};
