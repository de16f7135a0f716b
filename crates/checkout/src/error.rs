//! Checkout error types.

use thiserror::Error;

use common::SkuCode;
use stock_store::StoreError;

/// Errors surfaced by the checkout engine.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The requested quantity exceeds availability, or a concurrent
    /// decrement won the race for the last units. Storage failures inside a
    /// reconciliation are folded into this variant too, so a torn write
    /// never misreports availability to the shopper.
    #[error("insufficient stock{}", .sku.as_ref().map(|s| format!(" for {s}")).unwrap_or_default())]
    OutOfStock { sku: Option<SkuCode> },

    /// No live checkout session for the presented token; the shopper must
    /// restart checkout.
    #[error("checkout session not found")]
    SessionNotFound,

    /// Storage failure outside the reconciliation boundary.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CheckoutError {
    /// Out-of-stock error naming a SKU.
    pub fn out_of_stock(sku: SkuCode) -> Self {
        CheckoutError::OutOfStock { sku: Some(sku) }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
