use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ProductId, SessionId};
use tokio::sync::RwLock;

use crate::{
    Catalog, ClaimField, FulfillmentRecord, FulfillmentStatus, FulfillmentStore, LicenseRecord,
    LicenseStore, NewLicense, ProductRecord, Result, StoreError, constraints,
};

#[derive(Debug, Default)]
struct InMemoryState {
    fulfillments: HashMap<SessionId, FulfillmentRecord>,
    licenses: Vec<LicenseRecord>,
    products: HashMap<ProductId, ProductRecord>,
    forced_code_collisions: u32,
    license_insert_attempts: u32,
    fail_on_decrement: bool,
    fail_on_license_reads: bool,
}

/// In-memory store for tests and local development.
///
/// Every operation runs under one write guard, which gives it the same
/// atomicity the PostgreSQL statements have, and the uniqueness constraints
/// of the schema are checked explicitly.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product to the catalog.
    pub async fn add_product(&self, product: ProductRecord) {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    /// Looks a product up by slug.
    pub async fn product(&self, slug: &str) -> Option<ProductRecord> {
        self.state
            .read()
            .await
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned()
    }

    /// Inserts a license row as-is, bypassing the issuer. Used to seed rows
    /// created before purchase item references existed.
    pub async fn insert_license_record(&self, license: LicenseRecord) {
        self.state.write().await.licenses.push(license);
    }

    /// Returns the total number of licenses stored.
    pub async fn license_count(&self) -> usize {
        self.state.read().await.licenses.len()
    }

    /// Makes the next `rounds` license batch inserts fail with a `code`
    /// uniqueness violation.
    pub async fn force_code_collisions(&self, rounds: u32) {
        self.state.write().await.forced_code_collisions = rounds;
    }

    /// Returns how many times `insert_licenses` has been called.
    pub async fn license_insert_attempts(&self) -> u32 {
        self.state.read().await.license_insert_attempts
    }

    /// Configures stock decrements to fail.
    pub async fn set_fail_on_decrement(&self, fail: bool) {
        self.state.write().await.fail_on_decrement = fail;
    }

    /// Configures license reads to fail as if the database were unreachable.
    pub async fn set_fail_on_license_reads(&self, fail: bool) {
        self.state.write().await.fail_on_license_reads = fail;
    }

    /// Clears all records and injected failures.
    pub async fn clear(&self) {
        *self.state.write().await = InMemoryState::default();
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryStore {
    async fn insert_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>> {
        let mut state = self.state.write().await;
        if state.fulfillments.contains_key(session_id) {
            return Ok(None);
        }
        let record = FulfillmentRecord::started(session_id.clone(), event_id);
        state
            .fulfillments
            .insert(session_id.clone(), record.clone());
        Ok(Some(record))
    }

    async fn get_fulfillment(&self, session_id: &SessionId) -> Result<Option<FulfillmentRecord>> {
        Ok(self.state.read().await.fulfillments.get(session_id).cloned())
    }

    async fn restart_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>> {
        let mut state = self.state.write().await;
        let Some(record) = state.fulfillments.get_mut(session_id) else {
            return Ok(None);
        };
        if !record.status.can_restart() {
            return Ok(None);
        }
        record.status = FulfillmentStatus::Processing;
        record.attempt_count += 1;
        record.last_error = None;
        record.event_id = event_id.to_string();
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn mark_fulfillment_failed(&self, session_id: &SessionId, message: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.fulfillments.get_mut(session_id)
            && record.status != FulfillmentStatus::Completed
        {
            record.status = FulfillmentStatus::Failed;
            record.last_error = Some(message.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_fulfillment_completed(&self, session_id: &SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.fulfillments.get_mut(session_id)
            && record.status != FulfillmentStatus::Completed
        {
            let now = Utc::now();
            record.status = FulfillmentStatus::Completed;
            record.processed_at = Some(now);
            record.last_error = None;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn claim_field(&self, session_id: &SessionId, field: ClaimField) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(record) = state.fulfillments.get_mut(session_id) else {
            return Ok(false);
        };
        let slot = match field {
            ClaimField::StockDecrementedAt => &mut record.stock_decremented_at,
            ClaimField::EmailSentAt => &mut record.email_sent_at,
        };
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl LicenseStore for InMemoryStore {
    async fn licenses_for_session(&self, session_id: &SessionId) -> Result<Vec<LicenseRecord>> {
        let state = self.state.read().await;
        if state.fail_on_license_reads {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut licenses: Vec<_> = state
            .licenses
            .iter()
            .filter(|l| l.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect();
        licenses.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.purchase_item_ref.cmp(&b.purchase_item_ref))
        });
        Ok(licenses)
    }

    async fn insert_licenses(&self, licenses: &[NewLicense]) -> Result<u64> {
        let mut state = self.state.write().await;
        state.license_insert_attempts += 1;

        if state.forced_code_collisions > 0 {
            state.forced_code_collisions -= 1;
            return Err(StoreError::UniqueViolation {
                constraint: constraints::LICENSE_CODE.to_string(),
            });
        }

        let mut refs: HashSet<String> = state
            .licenses
            .iter()
            .filter_map(|l| l.purchase_item_ref.clone())
            .collect();
        let mut codes: HashSet<String> = state.licenses.iter().map(|l| l.code.clone()).collect();
        let mut tokens: HashSet<String> = state
            .licenses
            .iter()
            .map(|l| l.claim_token.clone())
            .collect();

        // The batch is all-or-nothing: collect first, commit after every
        // row has passed the constraint checks.
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(licenses.len());
        for license in licenses {
            if !refs.insert(license.purchase_item_ref.clone()) {
                continue;
            }
            if !codes.insert(license.code.clone()) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::LICENSE_CODE.to_string(),
                });
            }
            if !tokens.insert(license.claim_token.clone()) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::LICENSE_CLAIM_TOKEN.to_string(),
                });
            }
            inserted.push(license.clone().into_record(now));
        }

        let count = inserted.len() as u64;
        state.licenses.extend(inserted);
        Ok(count)
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn products_by_refs(&self, refs: &[String]) -> Result<Vec<ProductRecord>> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| refs.contains(&p.slug))
            .cloned()
            .collect())
    }

    async fn decrement_stock(&self, product_id: ProductId, quantity: i32) -> Result<i32> {
        let mut state = self.state.write().await;
        if state.fail_on_decrement {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let stock = state
            .products
            .get_mut(&product_id)
            .and_then(|p| p.stock_quantity.as_mut())
            .ok_or(StoreError::StockNotTracked(product_id))?;
        *stock = (*stock - quantity).max(0);
        Ok(*stock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::LicenseId;

    fn new_license(session: &str, item_ref: &str, code: &str, token: &str) -> NewLicense {
        NewLicense {
            id: LicenseId::new(),
            code: code.to_string(),
            product_id: ProductId::new(),
            session_id: SessionId::new(session),
            customer_email: "buyer@example.com".to_string(),
            claim_token: token.to_string(),
            purchase_item_ref: item_ref.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_fulfillment_only_once_per_session() {
        let store = InMemoryStore::new();
        let session = SessionId::new("sess_A");

        let first = store.insert_fulfillment(&session, "evt_1").await.unwrap();
        let second = store.insert_fulfillment(&session, "evt_2").await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let stored = store.get_fulfillment(&session).await.unwrap().unwrap();
        assert_eq!(stored.event_id, "evt_1");
    }

    #[tokio::test]
    async fn restart_skips_completed_records() {
        let store = InMemoryStore::new();
        let session = SessionId::new("sess_A");
        store.insert_fulfillment(&session, "evt_1").await.unwrap();
        store.mark_fulfillment_completed(&session).await.unwrap();

        let restarted = store.restart_fulfillment(&session, "evt_2").await.unwrap();
        assert!(restarted.is_none());
    }

    #[tokio::test]
    async fn restart_increments_attempts_and_clears_error() {
        let store = InMemoryStore::new();
        let session = SessionId::new("sess_A");
        store.insert_fulfillment(&session, "evt_1").await.unwrap();
        store
            .mark_fulfillment_failed(&session, "boom")
            .await
            .unwrap();

        let restarted = store
            .restart_fulfillment(&session, "evt_2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restarted.status, FulfillmentStatus::Processing);
        assert_eq!(restarted.attempt_count, 2);
        assert_eq!(restarted.event_id, "evt_2");
        assert!(restarted.last_error.is_none());
    }

    #[tokio::test]
    async fn failure_never_overwrites_completion() {
        let store = InMemoryStore::new();
        let session = SessionId::new("sess_A");
        store.insert_fulfillment(&session, "evt_1").await.unwrap();
        store.mark_fulfillment_completed(&session).await.unwrap();
        store
            .mark_fulfillment_failed(&session, "late failure")
            .await
            .unwrap();

        let record = store.get_fulfillment(&session).await.unwrap().unwrap();
        assert_eq!(record.status, FulfillmentStatus::Completed);
        assert!(record.last_error.is_none());
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn claim_field_succeeds_once() {
        let store = InMemoryStore::new();
        let session = SessionId::new("sess_A");
        store.insert_fulfillment(&session, "evt_1").await.unwrap();

        assert!(store.claim_field(&session, ClaimField::EmailSentAt).await.unwrap());
        assert!(!store.claim_field(&session, ClaimField::EmailSentAt).await.unwrap());
        assert!(
            store
                .claim_field(&session, ClaimField::StockDecrementedAt)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn claim_field_without_record_is_refused() {
        let store = InMemoryStore::new();
        let claimed = store
            .claim_field(&SessionId::new("missing"), ClaimField::EmailSentAt)
            .await
            .unwrap();
        assert!(!claimed);
    }

    #[tokio::test]
    async fn insert_licenses_skips_existing_purchase_item_refs() {
        let store = InMemoryStore::new();
        let batch = vec![
            new_license("sess_A", "sess_A:li_1:1", "CODE-1", "tok-1"),
            new_license("sess_A", "sess_A:li_1:2", "CODE-2", "tok-2"),
        ];
        assert_eq!(store.insert_licenses(&batch).await.unwrap(), 2);

        let retry = vec![
            new_license("sess_A", "sess_A:li_1:1", "CODE-3", "tok-3"),
            new_license("sess_A", "sess_A:li_1:2", "CODE-4", "tok-4"),
        ];
        assert_eq!(store.insert_licenses(&retry).await.unwrap(), 0);
        assert_eq!(store.license_count().await, 2);
    }

    #[tokio::test]
    async fn code_collision_rejects_whole_batch() {
        let store = InMemoryStore::new();
        store
            .insert_licenses(&[new_license("sess_A", "sess_A:li_1:1", "CODE-1", "tok-1")])
            .await
            .unwrap();

        let batch = vec![
            new_license("sess_B", "sess_B:li_1:1", "CODE-9", "tok-9"),
            new_license("sess_B", "sess_B:li_1:2", "CODE-1", "tok-10"),
        ];
        let err = store.insert_licenses(&batch).await.unwrap_err();
        assert!(err.is_generated_field_collision());
        assert_eq!(store.license_count().await, 1);
    }

    #[tokio::test]
    async fn claim_token_collision_is_reported() {
        let store = InMemoryStore::new();
        let batch = vec![
            new_license("sess_A", "sess_A:li_1:1", "CODE-1", "same"),
            new_license("sess_A", "sess_A:li_1:2", "CODE-2", "same"),
        ];
        let err = store.insert_licenses(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { ref constraint } if constraint == constraints::LICENSE_CLAIM_TOKEN
        ));
        assert_eq!(store.license_count().await, 0);
    }

    #[tokio::test]
    async fn forced_collisions_are_consumed() {
        let store = InMemoryStore::new();
        store.force_code_collisions(1).await;
        let batch = vec![new_license("sess_A", "sess_A:li_1:1", "CODE-1", "tok-1")];

        assert!(store.insert_licenses(&batch).await.is_err());
        assert_eq!(store.insert_licenses(&batch).await.unwrap(), 1);
        assert_eq!(store.license_insert_attempts().await, 2);
    }

    #[tokio::test]
    async fn licenses_for_session_filters_by_session() {
        let store = InMemoryStore::new();
        store
            .insert_licenses(&[
                new_license("sess_A", "sess_A:li_1:1", "CODE-1", "tok-1"),
                new_license("sess_B", "sess_B:li_1:1", "CODE-2", "tok-2"),
            ])
            .await
            .unwrap();

        let licenses = store
            .licenses_for_session(&SessionId::new("sess_A"))
            .await
            .unwrap();
        assert_eq!(licenses.len(), 1);
        assert_eq!(licenses[0].code, "CODE-1");
    }

    #[tokio::test]
    async fn decrement_stock_clamps_at_zero() {
        let store = InMemoryStore::new();
        let product = ProductRecord::new("robot-kit", "Robot Kit").with_stock(3);
        let product_id = product.id;
        store.add_product(product).await;

        assert_eq!(store.decrement_stock(product_id, 2).await.unwrap(), 1);
        assert_eq!(store.decrement_stock(product_id, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn decrement_untracked_stock_fails() {
        let store = InMemoryStore::new();
        let product = ProductRecord::new("ebook", "E-Book");
        let product_id = product.id;
        store.add_product(product).await;

        let err = store.decrement_stock(product_id, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::StockNotTracked(id) if id == product_id));
    }

    #[tokio::test]
    async fn products_by_refs_ignores_unknown_refs() {
        let store = InMemoryStore::new();
        store
            .add_product(ProductRecord::new("robot-kit", "Robot Kit"))
            .await;

        let found = store
            .products_by_refs(&["robot-kit".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug, "robot-kit");
    }
}
