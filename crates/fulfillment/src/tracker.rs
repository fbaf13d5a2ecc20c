//! Durable per-session fulfillment state.

use common::SessionId;
use store::{FulfillmentRecord, FulfillmentStore};

use crate::error::Result;

/// Result of starting (or resuming) a session.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// The record is Processing and this delivery owns the attempt.
    Started(FulfillmentRecord),
    /// The session was already completed by an earlier delivery.
    AlreadyCompleted(FulfillmentRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &FulfillmentRecord {
        match self {
            StartOutcome::Started(record) | StartOutcome::AlreadyCompleted(record) => record,
        }
    }
}

/// Start/resume, complete and fail transitions for fulfillment records.
#[derive(Debug, Clone)]
pub struct FulfillmentTracker<S> {
    store: S,
}

impl<S: FulfillmentStore> FulfillmentTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Starts processing a session, or resumes it on redelivery.
    ///
    /// Safe to call on every delivery: the first one inserts the record, a
    /// later one on a Failed or Processing record bumps the attempt count,
    /// and any delivery for a Completed session gets `AlreadyCompleted`.
    pub async fn start(&self, session_id: &SessionId, event_id: &str) -> Result<StartOutcome> {
        if let Some(record) = self.store.insert_fulfillment(session_id, event_id).await? {
            return Ok(StartOutcome::Started(record));
        }

        if let Some(existing) = self.store.get_fulfillment(session_id).await?
            && existing.is_completed()
        {
            return Ok(StartOutcome::AlreadyCompleted(existing));
        }

        if let Some(record) = self.store.restart_fulfillment(session_id, event_id).await? {
            tracing::info!(
                %session_id,
                attempt = record.attempt_count,
                "resuming fulfillment"
            );
            return Ok(StartOutcome::Started(record));
        }

        // The restart lost a race against a concurrent completion.
        let record = self.store.get_fulfillment(session_id).await?.ok_or_else(|| {
            store::StoreError::InvalidData(format!(
                "fulfillment record for session {session_id} disappeared"
            ))
        })?;
        Ok(StartOutcome::AlreadyCompleted(record))
    }

    /// Records a failure. Storage errors are logged, never returned.
    pub async fn mark_failed(&self, session_id: &SessionId, message: &str) {
        if let Err(e) = self
            .store
            .mark_fulfillment_failed(session_id, message)
            .await
        {
            tracing::error!(%session_id, error = %e, "failed to record fulfillment failure");
        }
    }

    /// Marks the session completed. Idempotent.
    pub async fn mark_completed(&self, session_id: &SessionId) -> Result<()> {
        self.store.mark_fulfillment_completed(session_id).await?;
        Ok(())
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<Option<FulfillmentRecord>> {
        Ok(self.store.get_fulfillment(session_id).await?)
    }
}
