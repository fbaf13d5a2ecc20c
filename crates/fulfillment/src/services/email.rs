//! Email sender trait and implementations for purchase confirmations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::SessionId;
use reqwest::Client;
use serde::Serialize;

use crate::error::FulfillmentError;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// One license line in a purchase confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseSummary {
    pub code: String,
    pub product_name: String,
}

/// Structured content of a purchase confirmation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseConfirmation {
    pub to_email: String,
    pub session_id: SessionId,
    /// Order total in the currency's minor unit.
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub licenses: Vec<LicenseSummary>,
}

impl PurchaseConfirmation {
    /// Formats the order total, e.g. `"49.00 USD"`.
    pub fn formatted_total(&self) -> Option<String> {
        let amount = self.amount_total?;
        let currency = self
            .currency
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_default();
        let sign = if amount < 0 { "-" } else { "" };
        let minor = amount.unsigned_abs();
        Some(
            format!("{sign}{}.{:02} {currency}", minor / 100, minor % 100)
                .trim_end()
                .to_string(),
        )
    }

    /// Plain-text body listing every license code.
    pub fn text_body(&self) -> String {
        let mut body = String::from("Thank you for your purchase!\n\n");
        if let Some(total) = self.formatted_total() {
            body.push_str(&format!("Order total: {total}\n\n"));
        }
        body.push_str("Your license codes:\n");
        for license in &self.licenses {
            body.push_str(&format!("  {}: {}\n", license.product_name, license.code));
        }
        body.push_str("\nUse the link in your account page to claim these licenses.\n");
        body
    }
}

/// Sends purchase confirmation messages.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_purchase_confirmation(
        &self,
        message: &PurchaseConfirmation,
    ) -> Result<(), FulfillmentError>;
}

#[async_trait]
impl<T: EmailSender + ?Sized> EmailSender for Arc<T> {
    async fn send_purchase_confirmation(
        &self,
        message: &PurchaseConfirmation,
    ) -> Result<(), FulfillmentError> {
        (**self).send_purchase_confirmation(message).await
    }
}

#[derive(Debug, Default)]
struct InMemoryEmailState {
    sent: Vec<PurchaseConfirmation>,
    fail_on_send: bool,
}

/// In-memory email sender for testing and local development. Messages are
/// logged and kept instead of delivered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEmailSender {
    state: Arc<RwLock<InMemoryEmailState>>,
}

impl InMemoryEmailSender {
    /// Creates a new in-memory email sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sender to fail on send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Returns the number of messages sent.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns a copy of every message sent.
    pub fn sent(&self) -> Vec<PurchaseConfirmation> {
        self.state.read().unwrap().sent.clone()
    }
}

#[async_trait]
impl EmailSender for InMemoryEmailSender {
    async fn send_purchase_confirmation(
        &self,
        message: &PurchaseConfirmation,
    ) -> Result<(), FulfillmentError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_send {
            return Err(FulfillmentError::EmailSender(
                "Mail transport unavailable".to_string(),
            ));
        }

        tracing::info!(
            to = %message.to_email,
            session_id = %message.session_id,
            licenses = message.licenses.len(),
            "purchase confirmation recorded"
        );
        state.sent.push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: String,
}

/// Sends confirmations through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendEmailSender {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendEmailSender {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    #[tracing::instrument(skip(self, message), fields(session_id = %message.session_id))]
    async fn send_purchase_confirmation(
        &self,
        message: &PurchaseConfirmation,
    ) -> Result<(), FulfillmentError> {
        let request = ResendRequest {
            from: &self.from,
            to: [&message.to_email],
            subject: "Your license codes",
            text: message.text_body(),
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FulfillmentError::EmailSender(format!("Resend API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FulfillmentError::EmailSender(format!(
                "Resend API returned {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation() -> PurchaseConfirmation {
        PurchaseConfirmation {
            to_email: "buyer@example.com".into(),
            session_id: SessionId::new("sess_A"),
            amount_total: Some(4900),
            currency: Some("usd".into()),
            licenses: vec![LicenseSummary {
                code: "ABCD-EFGH-JKLM-NPQR".into(),
                product_name: "Robot Kit".into(),
            }],
        }
    }

    #[test]
    fn formats_total_in_major_units() {
        assert_eq!(confirmation().formatted_total().as_deref(), Some("49.00 USD"));

        let mut refund = confirmation();
        refund.amount_total = Some(-50);
        assert_eq!(refund.formatted_total().as_deref(), Some("-0.50 USD"));
        refund.amount_total = Some(-4_925);
        assert_eq!(refund.formatted_total().as_deref(), Some("-49.25 USD"));

        let mut no_total = confirmation();
        no_total.amount_total = None;
        assert!(no_total.formatted_total().is_none());
    }

    #[test]
    fn text_body_lists_codes() {
        let body = confirmation().text_body();
        assert!(body.contains("Robot Kit: ABCD-EFGH-JKLM-NPQR"));
        assert!(body.contains("Order total: 49.00 USD"));
    }

    #[tokio::test]
    async fn in_memory_records_sent_messages() {
        let sender = InMemoryEmailSender::new();
        sender
            .send_purchase_confirmation(&confirmation())
            .await
            .unwrap();
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(sender.sent()[0].to_email, "buyer@example.com");
    }

    #[tokio::test]
    async fn in_memory_failure_sends_nothing() {
        let sender = InMemoryEmailSender::new();
        sender.set_fail_on_send(true);
        let result = sender.send_purchase_confirmation(&confirmation()).await;
        assert!(matches!(result, Err(FulfillmentError::EmailSender(_))));
        assert_eq!(sender.sent_count(), 0);
    }
}
