use thiserror::Error;

use common::SkuCode;

/// Errors that can occur when interacting with the stock store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional decrement affected zero rows: either the guard
    /// `available >= qty` failed or the SKU row vanished. This is the signal
    /// that serializes concurrent buyers of the last unit.
    #[error("insufficient stock for {sku}")]
    InsufficientStock { sku: SkuCode },

    /// The SKU does not exist.
    #[error("unknown SKU: {0}")]
    SkuNotFound(SkuCode),

    /// A persisted row holds a value the domain types cannot represent.
    #[error("corrupt row: {0}")]
    CorruptRow(&'static str),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for stock store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
