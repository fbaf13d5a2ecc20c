//! Stripe webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use common::SessionId;
use fulfillment::{CheckoutCompleted, FulfillmentOutcome};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::signature::{SIGNATURE_HEADER, SignatureError, verify_signature};
use crate::state::{AppState, AppStore};

/// Event types that trigger fulfillment.
const FULFILLMENT_EVENT_TYPES: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

/// Payment statuses that allow fulfillment.
const FULFILLABLE_PAYMENT_STATUSES: &[&str] = &["paid", "no_payment_required"];

// -- Payload types --

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

impl StripeCheckoutSession {
    fn is_fulfillable(&self) -> bool {
        self.payment_status
            .as_deref()
            .is_none_or(|s| FULFILLABLE_PAYMENT_STATUSES.contains(&s))
    }

    /// Email entered at checkout, falling back to the prefilled one.
    fn email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or_else(|| self.customer_email.clone())
    }

    fn into_checkout(self, event_id: String) -> CheckoutCompleted {
        CheckoutCompleted {
            customer_email: self.email(),
            session_id: SessionId::new(self.id),
            event_id,
            amount_total: self.amount_total,
            currency: self.currency,
        }
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl WebhookResponse {
    fn acknowledged() -> Self {
        Self {
            received: true,
            status: None,
            count: None,
        }
    }
}

impl From<FulfillmentOutcome> for WebhookResponse {
    fn from(outcome: FulfillmentOutcome) -> Self {
        Self {
            received: true,
            status: Some(outcome.as_str()),
            count: outcome.count(),
        }
    }
}

/// POST /webhooks/stripe: verifies and fulfills a checkout event.
#[tracing::instrument(skip_all)]
pub async fn receive<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal("Webhook secret not configured".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(SignatureError::MissingHeader.to_string()))?;

    verify_signature(secret, signature, &body, chrono::Utc::now().timestamp()).map_err(
        |e| match e {
            SignatureError::InvalidSecret => ApiError::Internal(e.to_string()),
            _ => {
                tracing::warn!(error = %e, "webhook signature rejected");
                ApiError::BadRequest(e.to_string())
            }
        },
    )?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid event payload: {e}")))?;

    if !FULFILLMENT_EVENT_TYPES.contains(&event.event_type.as_str()) {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "ignoring event");
        return Ok(Json(WebhookResponse::acknowledged()));
    }

    let session: StripeCheckoutSession = serde_json::from_value(event.data.object)
        .map_err(|e| ApiError::BadRequest(format!("Invalid checkout session: {e}")))?;

    if !session.is_fulfillable() {
        tracing::info!(
            event_id = %event.id,
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "payment not settled, acknowledging without fulfillment"
        );
        return Ok(Json(WebhookResponse::acknowledged()));
    }

    let checkout = session.into_checkout(event.id);
    let outcome = state.orchestrator.fulfill(&checkout).await?;
    Ok(Json(outcome.into()))
}
