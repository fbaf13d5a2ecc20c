//! Idempotent license issuance.
//!
//! Every purchased unit maps to one deterministic `purchase_item_ref`. The
//! issuer only ever inserts refs that are missing for the session, and the
//! store's unique constraint on that column absorbs concurrent inserts of the
//! same ref. Random codes and claim tokens can still collide with existing
//! rows; such a collision rejects the whole batch, which is then regenerated
//! and retried a bounded number of times.

use std::collections::{HashMap, HashSet};

use common::{LicenseId, SessionId};
use store::{LicenseRecord, LicenseStore, NewLicense, ProductRecord};

use crate::codes::{generate_claim_token, generate_license_code};
use crate::error::{FulfillmentError, Result};
use crate::line_items::ResolvedLineItem;

/// Upper bound on batch insert rounds when generated fields collide.
pub const MAX_INSERT_ROUNDS: u32 = 8;

/// Builds the idempotency key of one purchased unit.
pub fn purchase_item_ref(session_id: &SessionId, line_item_id: &str, unit_index: u32) -> String {
    format!("{session_id}:{line_item_id}:{unit_index}")
}

/// A unit that still needs a license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub purchase_item_ref: String,
    pub product_ref: String,
}

/// Lists the units of `items` whose refs are not in `existing_refs`, in line
/// item order with unit indexes `1..=quantity`.
pub fn plan_missing_units(
    session_id: &SessionId,
    items: &[ResolvedLineItem],
    existing_refs: &HashSet<String>,
) -> Vec<PlannedUnit> {
    items
        .iter()
        .flat_map(|item| {
            (1..=item.quantity).map(move |unit| PlannedUnit {
                purchase_item_ref: purchase_item_ref(session_id, &item.line_item_id, unit),
                product_ref: item.product_ref.clone(),
            })
        })
        .filter(|unit| !existing_refs.contains(&unit.purchase_item_ref))
        .collect()
}

/// The session's full license set after an issue call.
#[derive(Debug, Clone)]
pub struct IssuedLicenses {
    pub licenses: Vec<LicenseRecord>,
    /// Rows inserted by this call. Zero on replays.
    pub created: u64,
}

/// Creates the licenses a session is owed, exactly once per unit.
#[derive(Debug, Clone)]
pub struct LicenseIssuer<S> {
    store: S,
    max_rounds: u32,
}

impl<S: LicenseStore> LicenseIssuer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_rounds: MAX_INSERT_ROUNDS,
        }
    }

    /// Ensures every unit of `items` has a license and returns the full set.
    ///
    /// `products` maps each product ref in `items` to its catalog record; a
    /// ref missing from it is reported as `UnknownProducts`.
    #[tracing::instrument(
        skip(self, customer_email, items, products),
        fields(units = tracing::field::Empty)
    )]
    pub async fn issue(
        &self,
        session_id: &SessionId,
        customer_email: &str,
        items: &[ResolvedLineItem],
        products: &HashMap<String, ProductRecord>,
    ) -> Result<IssuedLicenses> {
        let existing = self.store.licenses_for_session(session_id).await?;

        // Rows written before refs existed: the session was fulfilled by an
        // older pipeline and must not be topped up.
        if existing.iter().any(|l| l.purchase_item_ref.is_none()) {
            tracing::info!(
                %session_id,
                count = existing.len(),
                "session has legacy licenses without item refs, skipping issuance"
            );
            return Ok(IssuedLicenses {
                licenses: existing,
                created: 0,
            });
        }

        let existing_refs: HashSet<String> = existing
            .iter()
            .filter_map(|l| l.purchase_item_ref.clone())
            .collect();
        let missing = plan_missing_units(session_id, items, &existing_refs);
        tracing::Span::current().record("units", missing.len());

        if missing.is_empty() {
            return Ok(IssuedLicenses {
                licenses: existing,
                created: 0,
            });
        }

        let unknown: Vec<String> = missing
            .iter()
            .map(|u| u.product_ref.clone())
            .filter(|r| !products.contains_key(r))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            return Err(FulfillmentError::UnknownProducts(unknown));
        }

        let created = self
            .insert_with_retry(session_id, customer_email, &missing, products)
            .await?;
        metrics::counter!("licenses_issued_total").increment(created);

        let licenses = self.store.licenses_for_session(session_id).await?;
        tracing::info!(%session_id, created, total = licenses.len(), "licenses issued");
        Ok(IssuedLicenses { licenses, created })
    }

    async fn insert_with_retry(
        &self,
        session_id: &SessionId,
        customer_email: &str,
        missing: &[PlannedUnit],
        products: &HashMap<String, ProductRecord>,
    ) -> Result<u64> {
        for round in 1..=self.max_rounds {
            let batch: Vec<NewLicense> = missing
                .iter()
                .filter_map(|unit| {
                    products.get(&unit.product_ref).map(|product| NewLicense {
                        id: LicenseId::new(),
                        code: generate_license_code(),
                        product_id: product.id,
                        session_id: session_id.clone(),
                        customer_email: customer_email.to_string(),
                        claim_token: generate_claim_token(),
                        purchase_item_ref: unit.purchase_item_ref.clone(),
                    })
                })
                .collect();

            match self.store.insert_licenses(&batch).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if e.is_generated_field_collision() => {
                    metrics::counter!("license_code_collisions_total").increment(1);
                    tracing::warn!(
                        %session_id,
                        round,
                        error = %e,
                        "generated field collided, regenerating batch"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::CodeGenerationExhausted {
            rounds: self.max_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::InMemoryStore;

    fn item(line_item_id: &str, product_ref: &str, quantity: u32) -> ResolvedLineItem {
        ResolvedLineItem {
            product_ref: product_ref.into(),
            quantity,
            line_item_id: line_item_id.into(),
        }
    }

    async fn catalog(store: &InMemoryStore) -> HashMap<String, ProductRecord> {
        let product = ProductRecord::new("robot-kit", "Robot Kit");
        store.add_product(product.clone()).await;
        HashMap::from([(product.slug.clone(), product)])
    }

    #[test]
    fn unit_refs_are_one_based() {
        let session = SessionId::new("sess_A");
        let items = [item("li_1", "robot-kit", 3)];
        let planned = plan_missing_units(&session, &items, &HashSet::new());
        let refs: Vec<_> = planned.iter().map(|u| u.purchase_item_ref.as_str()).collect();
        assert_eq!(refs, vec!["sess_A:li_1:1", "sess_A:li_1:2", "sess_A:li_1:3"]);
    }

    #[test]
    fn existing_refs_are_not_planned() {
        let session = SessionId::new("sess_A");
        let existing = HashSet::from(["sess_A:li_1:1".to_string()]);
        let planned = plan_missing_units(&session, &[item("li_1", "robot-kit", 2)], &existing);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].purchase_item_ref, "sess_A:li_1:2");
    }

    #[tokio::test]
    async fn issues_one_license_per_unit() {
        let store = InMemoryStore::new();
        let products = catalog(&store).await;
        let issuer = LicenseIssuer::new(store.clone());
        let session = SessionId::new("sess_A");

        let issued = issuer
            .issue(&session, "buyer@example.com", &[item("li_1", "robot-kit", 2)], &products)
            .await
            .unwrap();

        assert_eq!(issued.created, 2);
        assert_eq!(issued.licenses.len(), 2);
        assert!(issued.licenses.iter().all(|l| l.owner_id.is_none()));
    }

    #[tokio::test]
    async fn replay_creates_nothing() {
        let store = InMemoryStore::new();
        let products = catalog(&store).await;
        let issuer = LicenseIssuer::new(store.clone());
        let session = SessionId::new("sess_A");
        let items = [item("li_1", "robot-kit", 2)];

        let first = issuer.issue(&session, "buyer@example.com", &items, &products).await.unwrap();
        let second = issuer.issue(&session, "buyer@example.com", &items, &products).await.unwrap();

        assert_eq!(second.created, 0);
        assert_eq!(first.licenses, second.licenses);
        assert_eq!(store.license_count().await, 2);
    }

    #[tokio::test]
    async fn recovers_from_code_collisions() {
        let store = InMemoryStore::new();
        let products = catalog(&store).await;
        store.force_code_collisions(3).await;
        let issuer = LicenseIssuer::new(store.clone());

        let issued = issuer
            .issue(
                &SessionId::new("sess_A"),
                "buyer@example.com",
                &[item("li_1", "robot-kit", 1)],
                &products,
            )
            .await
            .unwrap();

        assert_eq!(issued.created, 1);
        assert_eq!(store.license_insert_attempts().await, 4);
    }

    #[tokio::test]
    async fn collisions_beyond_bound_fail() {
        let store = InMemoryStore::new();
        let products = catalog(&store).await;
        store.force_code_collisions(MAX_INSERT_ROUNDS).await;
        let issuer = LicenseIssuer::new(store.clone());

        let result = issuer
            .issue(
                &SessionId::new("sess_A"),
                "buyer@example.com",
                &[item("li_1", "robot-kit", 1)],
                &products,
            )
            .await;

        assert!(matches!(
            result,
            Err(FulfillmentError::CodeGenerationExhausted { rounds: MAX_INSERT_ROUNDS })
        ));
        assert_eq!(store.license_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_rejected() {
        let store = InMemoryStore::new();
        let issuer = LicenseIssuer::new(store.clone());

        let result = issuer
            .issue(
                &SessionId::new("sess_A"),
                "buyer@example.com",
                &[item("li_1", "mystery", 1)],
                &HashMap::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(FulfillmentError::UnknownProducts(refs)) if refs == vec!["mystery"]
        ));
    }
}
