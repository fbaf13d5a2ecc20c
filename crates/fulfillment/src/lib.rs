//! Idempotent fulfillment of completed checkouts.
//!
//! A delivery of a completed checkout goes through these steps:
//! 1. Start or resume the session's fulfillment record
//! 2. Resolve licensable line items and their catalog products
//! 3. Issue one license per purchased unit
//! 4. Decrement stock and send the confirmation email, each at most once
//!
//! Any number of deliveries of the same session, sequential or concurrent,
//! converge on the same licenses and side effects.

pub mod claim;
pub mod codes;
pub mod error;
pub mod event;
pub mod inventory;
pub mod issuer;
pub mod line_items;
pub mod notifier;
pub mod orchestrator;
pub mod services;
pub mod tracker;

pub use claim::ClaimGate;
pub use error::{FulfillmentError, Result};
pub use event::CheckoutCompleted;
pub use inventory::InventoryDecrementer;
pub use issuer::{IssuedLicenses, LicenseIssuer, MAX_INSERT_ROUNDS, purchase_item_ref};
pub use line_items::{MAX_UNITS_PER_LINE_ITEM, ResolvedLineItem};
pub use notifier::NotificationDispatcher;
pub use orchestrator::{FulfillmentOrchestrator, FulfillmentOutcome, FulfillmentSnapshot};
pub use services::{
    EmailSender, InMemoryEmailSender, InMemoryLineItemProvider, LineItemProvider,
    ProviderLineItem, PurchaseConfirmation, ResendEmailSender, StripeLineItemProvider,
};
pub use tracker::{FulfillmentTracker, StartOutcome};
