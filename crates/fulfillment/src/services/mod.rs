//! External collaborator traits and their implementations.

pub mod email;
pub mod line_items;

pub use email::{
    EmailSender, InMemoryEmailSender, LicenseSummary, PurchaseConfirmation, ResendEmailSender,
};
pub use line_items::{
    InMemoryLineItemProvider, LineItemProvider, ProviderLineItem, ProviderPrice, ProviderProduct,
    StripeLineItemProvider,
};
