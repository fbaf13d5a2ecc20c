//! Fulfillment status lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::SessionId;
use fulfillment::FulfillmentSnapshot;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::{AppState, AppStore};

#[derive(Debug, Serialize)]
pub struct FulfillmentResponse {
    pub session_id: String,
    pub event_id: String,
    pub status: String,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub stock_decremented_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub licenses: Vec<LicenseResponse>,
}

/// License view without the code, claim token or customer email.
#[derive(Debug, Serialize)]
pub struct LicenseResponse {
    pub id: String,
    pub product_id: String,
    pub status: String,
    pub purchase_item_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<FulfillmentSnapshot> for FulfillmentResponse {
    fn from(snapshot: FulfillmentSnapshot) -> Self {
        let record = snapshot.record;
        Self {
            session_id: record.session_id.to_string(),
            event_id: record.event_id,
            status: record.status.to_string(),
            attempt_count: record.attempt_count,
            last_error: record.last_error,
            stock_decremented_at: record.stock_decremented_at,
            email_sent_at: record.email_sent_at,
            processed_at: record.processed_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            licenses: snapshot
                .licenses
                .into_iter()
                .map(|l| LicenseResponse {
                    id: l.id.to_string(),
                    product_id: l.product_id.to_string(),
                    status: l.status.as_str().to_string(),
                    purchase_item_ref: l.purchase_item_ref,
                    created_at: l.created_at,
                })
                .collect(),
        }
    }
}

/// GET /fulfillments/{session_id}: a session's fulfillment state.
pub async fn get<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
) -> Result<Json<FulfillmentResponse>, ApiError> {
    let session_id = SessionId::new(session_id);
    let snapshot = state
        .orchestrator
        .snapshot(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Fulfillment {session_id} not found")))?;
    Ok(Json(snapshot.into()))
}
