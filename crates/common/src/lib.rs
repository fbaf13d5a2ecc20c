//! Shared identifier types for the purchase fulfillment service.

mod types;

pub use types::{LicenseId, ProductId, SessionId};
