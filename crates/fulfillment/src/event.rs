//! Completed checkout handed from the webhook to the orchestrator.

use common::SessionId;
use serde::{Deserialize, Serialize};

/// A completed checkout, as handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    pub session_id: SessionId,
    /// Id of the provider event that carried this checkout.
    pub event_id: String,
    pub customer_email: Option<String>,
    /// Total in the currency's minor unit.
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

impl CheckoutCompleted {
    /// The customer email, if present and not blank.
    pub fn customer_email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_email_counts_as_missing() {
        let mut event = CheckoutCompleted {
            session_id: SessionId::new("sess_A"),
            event_id: "evt_1".into(),
            customer_email: Some("   ".into()),
            amount_total: None,
            currency: None,
        };
        assert!(event.customer_email().is_none());

        event.customer_email = Some(" buyer@example.com ".into());
        assert_eq!(event.customer_email(), Some("buyer@example.com"));
    }
}
