//! Configuration management for the pipeline services.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Parsing runs over a lookup function, so tests can feed a map instead of
//! touching the process environment.

use bulk_purchase_core::DEFAULT_ORDER_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// The offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Broker configuration
    pub broker: BrokerConfig,
    /// Order aggregation configuration
    pub aggregator: AggregatorConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Queue consumer configuration
    pub consumer: ConsumerConfig,
    /// Prometheus metrics configuration
    pub metrics: MetricsConfig,
}

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker addresses (comma-separated)
    pub url: String,
    /// Consumer group prefix; each queue gets `{prefix}-{queue}`
    pub consumer_group_prefix: String,
    /// Seconds between connection attempts while the broker is unreachable
    pub connect_retry_secs: u64,
    /// Publish timeout in seconds
    pub publish_timeout_secs: u64,
    /// Where new consumer groups start reading: earliest or latest
    pub auto_offset_reset: String,
}

/// Order aggregation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Order lines per provider that trigger a bulk purchase
    pub threshold: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Queue consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Seconds to wait before resubscribing or after a transient failure
    pub retry_delay_secs: u64,
}

/// Prometheus metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    pub enabled: bool,
    /// Metrics listener host (consumer services)
    pub host: String,
    /// Metrics listener port (consumer services)
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unparseable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let threshold = parse_or(&lookup, "ORDER_THRESHOLD", DEFAULT_ORDER_THRESHOLD)?;
        if threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "ORDER_THRESHOLD",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            broker: BrokerConfig {
                url: string_or(&lookup, "BROKER_URL", "localhost:9092"),
                consumer_group_prefix: string_or(&lookup, "BROKER_CONSUMER_GROUP_PREFIX", "bulk-purchase"),
                connect_retry_secs: parse_or(&lookup, "BROKER_CONNECT_RETRY_SECS", 3)?,
                publish_timeout_secs: parse_or(&lookup, "BROKER_PUBLISH_TIMEOUT_SECS", 5)?,
                auto_offset_reset: string_or(&lookup, "BROKER_AUTO_OFFSET_RESET", "earliest"),
            },
            aggregator: AggregatorConfig { threshold },
            server: ServerConfig {
                host: string_or(&lookup, "SERVER_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "SERVER_PORT", 5006)?,
                shutdown_timeout_secs: parse_or(&lookup, "SERVER_SHUTDOWN_TIMEOUT_SECS", 10)?,
            },
            consumer: ConsumerConfig {
                retry_delay_secs: parse_or(&lookup, "CONSUMER_RETRY_DELAY_SECS", 3)?,
            },
            metrics: MetricsConfig {
                enabled: flag_or(&lookup, "METRICS_ENABLED", true)?,
                host: string_or(&lookup, "METRICS_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "METRICS_PORT", 9090)?,
            },
        })
    }
}

impl BrokerConfig {
    /// Delay between connection attempts.
    #[must_use]
    pub const fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    /// Publish timeout.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

impl ServerConfig {
    /// `host:port` to bind the HTTP listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How long to wait for background tasks on shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ConsumerConfig {
    /// Pause before resubscribing or after a transient failure.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl MetricsConfig {
    /// Socket address of the standalone metrics listener.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `METRICS_HOST` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "METRICS_HOST",
                value: self.host.clone(),
                reason: e.to_string(),
            })
    }
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}
