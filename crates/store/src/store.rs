use async_trait::async_trait;
use common::{ProductId, SessionId};

use crate::{ClaimField, FulfillmentRecord, LicenseRecord, NewLicense, ProductRecord, Result};

/// Durable per-session fulfillment state.
///
/// Implementations must make every method a single atomic operation: the
/// conditional writes below are the only coordination concurrent deliveries
/// of the same session rely on.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Inserts a fresh Processing record unless one already exists for the
    /// session.
    ///
    /// Returns `None` when the session already has a record (the insert hit
    /// the session uniqueness constraint and was skipped).
    async fn insert_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>>;

    /// Loads the record for a session.
    async fn get_fulfillment(&self, session_id: &SessionId) -> Result<Option<FulfillmentRecord>>;

    /// Moves a non-completed record back to Processing, incrementing the
    /// attempt count, clearing the last error and recording `event_id`.
    ///
    /// Returns `None` if the record is missing or already Completed.
    async fn restart_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>>;

    /// Marks a non-completed record as Failed with the given message.
    async fn mark_fulfillment_failed(&self, session_id: &SessionId, message: &str) -> Result<()>;

    /// Marks the record Completed, stamping `processed_at` and clearing the
    /// last error. A no-op for an already Completed record.
    async fn mark_fulfillment_completed(&self, session_id: &SessionId) -> Result<()>;

    /// Sets `field = now()` only if it is currently null.
    ///
    /// Returns true iff this call performed the write.
    async fn claim_field(&self, session_id: &SessionId, field: ClaimField) -> Result<bool>;
}

/// License persistence.
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Returns every license linked to the session, oldest first.
    async fn licenses_for_session(&self, session_id: &SessionId) -> Result<Vec<LicenseRecord>>;

    /// Inserts a batch of licenses atomically, silently skipping rows whose
    /// `purchase_item_ref` already exists.
    ///
    /// A collision on `code` or `claim_token` fails the whole batch with
    /// [`crate::StoreError::UniqueViolation`]. Returns the number of rows
    /// actually inserted.
    async fn insert_licenses(&self, licenses: &[NewLicense]) -> Result<u64>;
}

/// Product catalog read path plus the atomic stock decrement.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the products whose slug is in `refs`. Unknown references are
    /// simply absent from the result.
    async fn products_by_refs(&self, refs: &[String]) -> Result<Vec<ProductRecord>>;

    /// Atomically subtracts `quantity` from the product's stock, clamping at
    /// zero, and returns the new stock level.
    async fn decrement_stock(&self, product_id: ProductId, quantity: i32) -> Result<i32>;
}
