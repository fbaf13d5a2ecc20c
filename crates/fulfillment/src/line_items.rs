//! Turns provider line items into licensable `(product, quantity, line item)`
//! tuples.

use crate::error::{FulfillmentError, Result};
use crate::services::ProviderLineItem;

/// Product metadata key carrying the catalog slug.
pub const PRODUCT_REF_METADATA_KEY: &str = "product_slug";

/// Product references that never produce a license.
pub const NON_LICENSABLE_REFS: &[&str] = &["shipping"];

/// Upper bound on units for a single line item.
pub const MAX_UNITS_PER_LINE_ITEM: u32 = 1_000;

/// A licensable line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLineItem {
    pub product_ref: String,
    pub quantity: u32,
    pub line_item_id: String,
}

/// Extracts licensable items, dropping anything without a product reference,
/// with a non-licensable reference, or with a zero quantity. A missing
/// quantity counts as one unit. A quantity above `MAX_UNITS_PER_LINE_ITEM`
/// fails the whole set.
pub fn resolve(items: &[ProviderLineItem]) -> Result<Vec<ResolvedLineItem>> {
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        let Some(product_ref) = item
            .product_metadata()
            .and_then(|m| m.get(PRODUCT_REF_METADATA_KEY))
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
        else {
            continue;
        };

        if NON_LICENSABLE_REFS.contains(&product_ref) {
            tracing::debug!(
                line_item_id = %item.id,
                product_ref,
                "skipping non-licensable item"
            );
            continue;
        }

        let quantity = match item.quantity {
            None => 1,
            Some(q) if q <= 0 => continue,
            Some(q) => u32::try_from(q)
                .ok()
                .filter(|q| *q <= MAX_UNITS_PER_LINE_ITEM)
                .ok_or_else(|| FulfillmentError::InvalidLineItem {
                    line_item_id: item.id.clone(),
                    quantity: q,
                })?,
        };

        resolved.push(ResolvedLineItem {
            product_ref: product_ref.to_string(),
            quantity,
            line_item_id: item.id.clone(),
        });
    }
    Ok(resolved)
}

/// Distinct product references across the items, in first-seen order.
pub fn product_refs(items: &[ResolvedLineItem]) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for item in items {
        if !refs.contains(&item.product_ref) {
            refs.push(item.product_ref.clone());
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_licensable_items() {
        let items = vec![
            ProviderLineItem::for_product("li_1", "robot-kit", 2),
            ProviderLineItem::for_product("li_2", "ebook", 1),
        ];
        let resolved = resolve(&items).unwrap();
        assert_eq!(
            resolved,
            vec![
                ResolvedLineItem {
                    product_ref: "robot-kit".into(),
                    quantity: 2,
                    line_item_id: "li_1".into(),
                },
                ResolvedLineItem {
                    product_ref: "ebook".into(),
                    quantity: 1,
                    line_item_id: "li_2".into(),
                },
            ]
        );
    }

    #[test]
    fn drops_shipping_and_unreferenced_items() {
        let items = vec![
            ProviderLineItem::for_product("li_ship", "shipping", 1),
            ProviderLineItem {
                id: "li_plain".into(),
                quantity: Some(1),
                ..Default::default()
            },
            ProviderLineItem::for_product("li_blank", "  ", 1),
        ];
        assert!(resolve(&items).unwrap().is_empty());
    }

    #[test]
    fn zero_quantity_is_dropped_and_missing_quantity_is_one() {
        let mut missing = ProviderLineItem::for_product("li_1", "robot-kit", 1);
        missing.quantity = None;
        let zero = ProviderLineItem::for_product("li_2", "robot-kit", 0);

        let resolved = resolve(&[missing, zero]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].quantity, 1);
    }

    #[test]
    fn oversized_quantity_is_rejected() {
        let at_limit = ProviderLineItem::for_product(
            "li_1",
            "robot-kit",
            i64::from(MAX_UNITS_PER_LINE_ITEM),
        );
        assert_eq!(resolve(&[at_limit]).unwrap()[0].quantity, MAX_UNITS_PER_LINE_ITEM);

        let huge = ProviderLineItem::for_product("li_2", "robot-kit", i64::from(u32::MAX) + 1);
        match resolve(&[huge]) {
            Err(FulfillmentError::InvalidLineItem {
                line_item_id,
                quantity,
            }) => {
                assert_eq!(line_item_id, "li_2");
                assert_eq!(quantity, i64::from(u32::MAX) + 1);
            }
            other => panic!("expected InvalidLineItem, got {other:?}"),
        }
    }

    #[test]
    fn product_refs_are_distinct() {
        let items = resolve(&[
            ProviderLineItem::for_product("li_1", "robot-kit", 1),
            ProviderLineItem::for_product("li_2", "ebook", 1),
            ProviderLineItem::for_product("li_3", "robot-kit", 3),
        ])
        .unwrap();
        assert_eq!(product_refs(&items), vec!["robot-kit", "ebook"]);
    }
}
