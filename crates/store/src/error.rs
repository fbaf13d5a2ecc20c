use common::ProductId;
use thiserror::Error;

/// Errors that can occur when interacting with the fulfillment store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write was rejected by a uniqueness constraint.
    ///
    /// `constraint` carries the constraint name, see [`crate::constraints`].
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The product does not exist or does not carry a stock quantity.
    #[error("Stock is not tracked for product {0}")]
    StockNotTracked(ProductId),

    /// A stored row could not be mapped back into a record.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if this is a collision on a randomly generated license
    /// field (`code` or `claim_token`), which the caller may resolve by
    /// regenerating those fields and retrying.
    pub fn is_generated_field_collision(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation { constraint }
                if constraint == crate::constraints::LICENSE_CODE
                    || constraint == crate::constraints::LICENSE_CLAIM_TOKEN
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
