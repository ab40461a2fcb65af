//! Event schema for the bulk purchase pipeline.
//!
//! Every message that crosses the broker is a [`PipelineEvent`]: a tagged union
//! whose JSON form carries an `"event"` discriminator. The JSON shape is the
//! contract with any producer or consumer outside this workspace:
//!
//! ```json
//! {"event": "bulk_purchase", "batch_id": "…", "provider_id": "P1",
//!  "orders": [{"product_id": "X", "quantity": 1}], "flushed_at": "2025-01-01T00:00:00Z"}
//! {"event": "notification_arrived", "order_id": "…"}
//! ```
//!
//! `batch_id` and `flushed_at` are optional on decode.
//!
//! # Decoding
//!
//! [`PipelineEvent::from_bytes`] separates two failure modes that consumers
//! treat differently:
//!
//! - [`EventError::DeserializationError`]: the payload is not a well-formed event
//!   (not JSON, no `"event"` field, or a known kind with a broken body)
//! - [`EventError::UnknownEventType`]: a well-formed envelope of a kind this
//!   build does not know; consumers log and skip these so new kinds can be
//!   introduced without breaking older consumers
//!
//! # Example
//!
//! ```
//! use bulk_purchase_core::event::{Event, NotificationEvent, PipelineEvent};
//! use bulk_purchase_core::types::BatchId;
//!
//! let event = PipelineEvent::NotificationArrived(NotificationEvent {
//!     order_id: BatchId::new("batch-1"),
//! });
//!
//! let bytes = event.to_bytes().unwrap();
//! assert_eq!(PipelineEvent::from_bytes(&bytes).unwrap(), event);
//! assert_eq!(event.event_type(), "notification_arrived.v1");
//! ```

use crate::types::{BatchId, OrderLine, ProviderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// An event that can travel over the broker.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix, e.g.
/// `"bulk_purchase.v1"`. It is used as the broker message key and in logs; the
/// JSON discriminator itself stays unversioned.
pub trait Event: Send + Sync + 'static {
    /// Returns the versioned event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not a valid
    /// encoding of this event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A full provider bucket, detached and published as one purchase.
///
/// `batch_id` and `flushed_at` are always set by the aggregator but may be
/// missing from producers that only send `provider_id` and `orders`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPurchaseEvent {
    /// Identifier of this batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// Provider the batch is placed with
    pub provider_id: ProviderId,
    /// Order lines in the order they were buffered
    pub orders: Vec<OrderLine>,
    /// When the batch was detached from its bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flushed_at: Option<DateTime<Utc>>,
}

/// Notice that a bulk purchase has been handled downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// The bulk purchase this notification refers to (its batch id)
    pub order_id: BatchId,
}

/// All event kinds carried by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Published by the aggregator to `bulk_purchases`
    BulkPurchase(BulkPurchaseEvent),
    /// Published by the notification stage to `reports`
    NotificationArrived(NotificationEvent),
}

impl PipelineEvent {
    /// JSON discriminators this build understands.
    pub const KINDS: [&'static str; 2] = ["bulk_purchase", "notification_arrived"];

    /// The unversioned JSON discriminator of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BulkPurchase(_) => "bulk_purchase",
            Self::NotificationArrived(_) => "notification_arrived",
        }
    }
}

impl Event for PipelineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::BulkPurchase(_) => "bulk_purchase.v1",
            Self::NotificationArrived(_) => "notification_arrived.v1",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        #[derive(Deserialize)]
        struct Envelope {
            event: String,
        }

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| EventError::DeserializationError(e.to_string()))?;

        if !Self::KINDS.contains(&envelope.event.as_str()) {
            return Err(EventError::UnknownEventType(envelope.event));
        }

        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// An encoded event ready to publish.
///
/// `event_type` travels as the message key so brokers that partition by key
/// keep one event type in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "bulk_purchase.v1").
    pub event_type: String,

    /// The JSON-encoded event.
    pub data: Vec<u8>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>) -> Self {
        Self { event_type, data }
    }

    /// Create a serialized event from an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(event: &E) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
