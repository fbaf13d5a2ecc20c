//! Once-per-session purchase confirmation.

use std::collections::HashMap;

use common::{ProductId, SessionId};
use store::{ClaimField, FulfillmentStore, LicenseRecord, ProductRecord};

use crate::claim::ClaimGate;
use crate::event::CheckoutCompleted;
use crate::services::{EmailSender, LicenseSummary, PurchaseConfirmation};

/// Sends one confirmation email per session.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher<S, E> {
    gate: ClaimGate<S>,
    sender: E,
}

impl<S, E> NotificationDispatcher<S, E>
where
    S: FulfillmentStore,
    E: EmailSender,
{
    pub fn new(store: S, sender: E) -> Self {
        Self {
            gate: ClaimGate::new(store),
            sender,
        }
    }

    /// Best effort: failures are logged, never returned.
    pub async fn notify_once(
        &self,
        event: &CheckoutCompleted,
        customer_email: &str,
        licenses: &[LicenseRecord],
        products: &HashMap<String, ProductRecord>,
    ) {
        let session_id = &event.session_id;
        match self.gate.claim_once(session_id, ClaimField::EmailSentAt).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%session_id, "confirmation already sent");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    %session_id,
                    error = %e,
                    "email claim failed, skipping confirmation"
                );
                return;
            }
        }

        let message = build_confirmation(event, customer_email, licenses, products);
        match self.sender.send_purchase_confirmation(&message).await {
            Ok(()) => tracing::info!(%session_id, to = %customer_email, "confirmation sent"),
            Err(e) => tracing::warn!(%session_id, error = %e, "confirmation email failed"),
        }
    }
}

/// Builds the confirmation for a session's license set.
pub fn build_confirmation(
    event: &CheckoutCompleted,
    customer_email: &str,
    licenses: &[LicenseRecord],
    products: &HashMap<String, ProductRecord>,
) -> PurchaseConfirmation {
    let names: HashMap<ProductId, &str> = products
        .values()
        .map(|p| (p.id, p.name.as_str()))
        .collect();

    PurchaseConfirmation {
        to_email: customer_email.to_string(),
        session_id: event.session_id.clone(),
        amount_total: event.amount_total,
        currency: event.currency.clone(),
        licenses: licenses
            .iter()
            .map(|l| LicenseSummary {
                code: l.code.clone(),
                product_name: names
                    .get(&l.product_id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| l.product_id.to_string()),
            })
            .collect(),
    }
}
