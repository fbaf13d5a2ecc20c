//! Fulfillment error types.

use store::StoreError;
use thiserror::Error;

/// Errors that abort a fulfillment attempt.
///
/// Best-effort side effects (stock decrement, confirmation email) never
/// surface here once their claim has been taken; they are logged instead.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The completed checkout carries no customer email.
    #[error("Missing customer email")]
    MissingCustomerEmail,

    /// Line items reference products the catalog does not know.
    #[error("Unknown product reference(s): {}", .0.join(", "))]
    UnknownProducts(Vec<String>),

    /// A line item asks for more units than a single item may carry.
    #[error("Line item {line_item_id} has invalid quantity {quantity}")]
    InvalidLineItem { line_item_id: String, quantity: i64 },

    /// Every insert round collided on a generated code or claim token.
    #[error("License code generation exhausted after {rounds} rounds")]
    CodeGenerationExhausted { rounds: u32 },

    /// The line item collaborator failed.
    #[error("Line item provider error: {0}")]
    LineItemProvider(String),

    /// The email collaborator failed.
    #[error("Email sender error: {0}")]
    EmailSender(String),

    /// Storage error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    /// Returns true for errors caused by the event's own data rather than
    /// by this service or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FulfillmentError::MissingCustomerEmail)
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::MissingCustomerEmail => "missing_customer_email",
            FulfillmentError::UnknownProducts(_) => "unknown_product",
            FulfillmentError::InvalidLineItem { .. } => "invalid_line_item",
            FulfillmentError::CodeGenerationExhausted { .. } => "code_generation_exhausted",
            FulfillmentError::LineItemProvider(_) => "line_item_provider",
            FulfillmentError::EmailSender(_) => "email_sender",
            FulfillmentError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
