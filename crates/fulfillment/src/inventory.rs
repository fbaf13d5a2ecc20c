//! Once-per-session stock decrement.

use std::collections::HashMap;

use common::{ProductId, SessionId};
use store::{Catalog, ClaimField, FulfillmentStore, ProductRecord};

use crate::claim::ClaimGate;
use crate::line_items::ResolvedLineItem;

/// Decrements tracked stock for a session's items, at most once per session.
#[derive(Debug, Clone)]
pub struct InventoryDecrementer<S> {
    store: S,
    gate: ClaimGate<S>,
}

impl<S: FulfillmentStore + Catalog + Clone> InventoryDecrementer<S> {
    pub fn new(store: S) -> Self {
        Self {
            gate: ClaimGate::new(store.clone()),
            store,
        }
    }

    /// Best effort: failures are logged, never returned. The claim is taken
    /// before any decrement, so a failure after it is not retried.
    pub async fn decrement_once(
        &self,
        session_id: &SessionId,
        items: &[ResolvedLineItem],
        products: &HashMap<String, ProductRecord>,
    ) {
        match self
            .gate
            .claim_once(session_id, ClaimField::StockDecrementedAt)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%session_id, "stock already decremented");
                return;
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "stock claim failed, skipping decrement");
                return;
            }
        }

        for (product_id, quantity) in quantities_by_product(items, products) {
            match self.store.decrement_stock(product_id, quantity).await {
                Ok(remaining) => {
                    tracing::info!(
                        %session_id,
                        %product_id,
                        quantity,
                        remaining,
                        "stock decremented"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        %session_id,
                        %product_id,
                        quantity,
                        error = %e,
                        "stock decrement failed"
                    );
                }
            }
        }
    }
}

/// Sums quantities per tracked product. Untracked products and refs missing
/// from `products` are left out.
pub fn quantities_by_product(
    items: &[ResolvedLineItem],
    products: &HashMap<String, ProductRecord>,
) -> Vec<(ProductId, i32)> {
    let mut totals: Vec<(ProductId, i32)> = Vec::new();
    for item in items {
        let Some(product) = products.get(&item.product_ref) else {
            continue;
        };
        if !product.decrements_stock() {
            continue;
        }
        let quantity = i32::try_from(item.quantity).unwrap_or(i32::MAX);
        match totals.iter_mut().find(|(id, _)| *id == product.id) {
            Some((_, total)) => *total = total.saturating_add(quantity),
            None => totals.push((product.id, quantity)),
        }
    }
    totals
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

    async fn setup() -> (InMemoryStore, HashMap<String, ProductRecord>, SessionId) {
        let store = InMemoryStore::new();
        let kit = ProductRecord::new("robot-kit", "Robot Kit").with_stock(10);
        let ebook = ProductRecord::new("ebook", "Ebook");
        store.add_product(kit.clone()).await;
        store.add_product(ebook.clone()).await;
        let session = SessionId::new("sess_A");
        store.insert_fulfillment(&session, "evt_1").await.unwrap();
        let products = HashMap::from([
            ("robot-kit".to_string(), kit),
            ("ebook".to_string(), ebook),
        ]);
        (store, products, session)
    }

    #[tokio::test]
    async fn aggregates_per_product_and_skips_untracked() {
        let (_, products, _) = setup().await;
        let items = [
            item("li_1", "robot-kit", 2),
            item("li_2", "ebook", 1),
            item("li_3", "robot-kit", 1),
        ];
        let totals = quantities_by_product(&items, &products);
        assert_eq!(totals, vec![(products["robot-kit"].id, 3)]);
    }

    #[tokio::test]
    async fn decrements_only_once() {
        let (store, products, session) = setup().await;
        let decrementer = InventoryDecrementer::new(store.clone());
        let items = [item("li_1", "robot-kit", 2)];

        decrementer.decrement_once(&session, &items, &products).await;
        decrementer.decrement_once(&session, &items, &products).await;

        let kit = store.product("robot-kit").await.unwrap();
        assert_eq!(kit.stock_quantity, Some(8));
    }

    #[tokio::test]
    async fn decrement_failure_is_swallowed_and_claim_kept() {
        let (store, products, session) = setup().await;
        store.set_fail_on_decrement(true).await;
        let decrementer = InventoryDecrementer::new(store.clone());

        decrementer
            .decrement_once(&session, &[item("li_1", "robot-kit", 2)], &products)
            .await;

        let record = store.get_fulfillment(&session).await.unwrap().unwrap();
        assert!(record.stock_decremented_at.is_some());
        assert_eq!(store.product("robot-kit").await.unwrap().stock_quantity, Some(10));
    }
}
