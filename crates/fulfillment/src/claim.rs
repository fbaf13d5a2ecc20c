//! Claim-once gating for side effects.

use common::SessionId;
use store::{ClaimField, FulfillmentStore};

use crate::error::Result;

/// Hands out at most one successful claim per `(session, field)`.
#[derive(Debug, Clone)]
pub struct ClaimGate<S> {
    store: S,
}

impl<S: FulfillmentStore> ClaimGate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns true iff this call set the claim field. A true result means
    /// the caller now owns the side effect guarded by `field`.
    pub async fn claim_once(&self, session_id: &SessionId, field: ClaimField) -> Result<bool> {
        let claimed = self.store.claim_field(session_id, field).await?;
        tracing::debug!(%session_id, field = field.column(), claimed, "claim attempted");
        Ok(claimed)
    }
}
