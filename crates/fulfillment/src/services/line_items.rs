//! Line item provider trait, provider payload types and implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::SessionId;
use reqwest::Client;
use serde::Deserialize;

use crate::error::FulfillmentError;

/// Line item as returned by the payment provider.
///
/// Only the fields the resolver reads are modeled; everything else in the
/// provider payload is ignored at deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderLineItem {
    pub id: String,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<ProviderPrice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderPrice {
    #[serde(default)]
    pub product: Option<ProviderProduct>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderProduct {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderLineItem {
    /// Builds a line item whose product carries `product_ref` in its
    /// metadata.
    pub fn for_product(id: impl Into<String>, product_ref: &str, quantity: i64) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            crate::line_items::PRODUCT_REF_METADATA_KEY.to_string(),
            product_ref.to_string(),
        );
        Self {
            id: id.into(),
            quantity: Some(quantity),
            description: None,
            price: Some(ProviderPrice {
                product: Some(ProviderProduct { metadata }),
            }),
        }
    }

    /// Metadata of the product behind this line item, if expanded.
    pub fn product_metadata(&self) -> Option<&HashMap<String, String>> {
        self.price
            .as_ref()
            .and_then(|p| p.product.as_ref())
            .map(|p| &p.metadata)
    }
}

/// Fetches the line items of a completed checkout session.
///
/// Line items are fetched separately rather than read from the event so
/// that large carts are not truncated by the event payload size limit.
#[async_trait]
pub trait LineItemProvider: Send + Sync {
    async fn line_items(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ProviderLineItem>, FulfillmentError>;
}

#[async_trait]
impl<T: LineItemProvider + ?Sized> LineItemProvider for Arc<T> {
    async fn line_items(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ProviderLineItem>, FulfillmentError> {
        (**self).line_items(session_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryLineItemState {
    sessions: HashMap<SessionId, Vec<ProviderLineItem>>,
    fail_on_fetch: bool,
    fetch_count: usize,
}

/// In-memory line item provider for testing and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLineItemProvider {
    state: Arc<RwLock<InMemoryLineItemState>>,
}

impl InMemoryLineItemProvider {
    /// Creates a new in-memory provider with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the line items returned for a session.
    pub fn set_line_items(&self, session_id: impl Into<SessionId>, items: Vec<ProviderLineItem>) {
        self.state
            .write()
            .unwrap()
            .sessions
            .insert(session_id.into(), items);
    }

    /// Configures the provider to fail on fetch.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.state.write().unwrap().fail_on_fetch = fail;
    }

    /// Returns how many fetches have been made.
    pub fn fetch_count(&self) -> usize {
        self.state.read().unwrap().fetch_count
    }
}

#[async_trait]
impl LineItemProvider for InMemoryLineItemProvider {
    async fn line_items(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ProviderLineItem>, FulfillmentError> {
        let mut state = self.state.write().unwrap();
        state.fetch_count += 1;

        if state.fail_on_fetch {
            return Err(FulfillmentError::LineItemProvider(
                "Line item service unavailable".to_string(),
            ));
        }

        Ok(state.sessions.get(session_id).cloned().unwrap_or_default())
    }
}

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const STRIPE_PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct StripeList {
    data: Vec<ProviderLineItem>,
    #[serde(default)]
    has_more: bool,
}

/// Fetches checkout line items from the Stripe API, with each line item's
/// product expanded so its metadata is available.
#[derive(Debug, Clone)]
pub struct StripeLineItemProvider {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeLineItemProvider {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (for a local mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LineItemProvider for StripeLineItemProvider {
    #[tracing::instrument(skip(self), fields(provider = "stripe"))]
    async fn line_items(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ProviderLineItem>, FulfillmentError> {
        let url = format!(
            "{}/checkout/sessions/{}/line_items",
            self.base_url, session_id
        );
        let mut items = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut query = vec![
                ("limit", STRIPE_PAGE_SIZE.to_string()),
                ("expand[]", "data.price.product".to_string()),
            ];
            if let Some(ref cursor) = starting_after {
                query.push(("starting_after", cursor.clone()));
            }

            let response = self
                .client
                .get(&url)
                .basic_auth(&self.secret_key, None::<&str>)
                .query(&query)
                .send()
                .await
                .map_err(|e| FulfillmentError::LineItemProvider(format!("Stripe API error: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(FulfillmentError::LineItemProvider(format!(
                    "Stripe API returned {status}: {body}"
                )));
            }

            let page: StripeList = response.json().await.map_err(|e| {
                FulfillmentError::LineItemProvider(format!("Failed to parse Stripe response: {e}"))
            })?;

            starting_after = page.data.last().map(|item| item.id.clone());
            let has_more = page.has_more;
            items.extend(page.data);

            if !has_more || starting_after.is_none() {
                break;
            }
        }

        tracing::debug!(count = items.len(), "fetched line items");
        Ok(items)
    }
}
