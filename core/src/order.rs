//! Inbound order submissions and their validation.
//!
//! An [`OrderRequest`] mirrors what the intake endpoint receives: every field is
//! optional because callers may omit any of them. [`OrderRequest::validate`]
//! turns it into a [`ValidatedOrder`] or a [`ValidationError`]; nothing is
//! buffered until validation has succeeded.

use crate::types::{OrderLine, ProductId, ProviderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a submission is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent or blank
    #[error("Missing order data: {0}")]
    MissingField(&'static str),

    /// Quantity was zero or negative
    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    /// Quantity does not fit in an order line
    #[error("Quantity {0} exceeds the maximum of {max}", max = u32::MAX)]
    QuantityTooLarge(i64),
}

/// A raw order submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Provider the order is placed with
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Product being ordered
    #[serde(default)]
    pub product_id: Option<String>,
    /// Units ordered
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// A submission that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedOrder {
    /// Provider whose bucket receives the line
    pub provider_id: ProviderId,
    /// The line to buffer
    pub line: OrderLine,
}

impl OrderRequest {
    /// Creates a fully populated request.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            provider_id: Some(provider_id.into()),
            product_id: Some(product_id.into()),
            quantity: Some(quantity),
        }
    }

    /// Validates the request.
    ///
    /// Identifiers are trimmed; a blank identifier counts as missing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a field is missing or blank, or the
    /// quantity is not in `1..=u32::MAX`.
    pub fn validate(&self) -> Result<ValidatedOrder, ValidationError> {
        let provider_id = required(self.provider_id.as_deref(), "provider_id")?;
        let product_id = required(self.product_id.as_deref(), "product_id")?;
        let quantity = self.quantity.ok_or(ValidationError::MissingField("quantity"))?;

        if quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }
        let quantity =
            u32::try_from(quantity).map_err(|_| ValidationError::QuantityTooLarge(quantity))?;

        Ok(ValidatedOrder {
            provider_id: ProviderId::new(provider_id),
            line: OrderLine::new(ProductId::new(product_id), quantity),
        })
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}
