//! Durable storage for purchase fulfillment.
//!
//! All cross-delivery coordination is delegated to this layer: a unique
//! session key on fulfillment records, a unique `purchase_item_ref` on
//! licenses and conditional "update where null" claim flags.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    ClaimField, FulfillmentRecord, FulfillmentStatus, LICENSE_SOURCE_ONLINE_PURCHASE,
    LicenseRecord, LicenseStatus, NewLicense, ProductRecord,
};
pub use store::{Catalog, FulfillmentStore, LicenseStore};

/// Names of the uniqueness constraints declared by the schema migration.
pub mod constraints {
    pub const FULFILLMENT_SESSION: &str = "fulfillments_pkey";
    pub const LICENSE_CODE: &str = "licenses_code_key";
    pub const LICENSE_CLAIM_TOKEN: &str = "licenses_claim_token_key";
    pub const LICENSE_PURCHASE_ITEM_REF: &str = "licenses_purchase_item_ref_key";
}
