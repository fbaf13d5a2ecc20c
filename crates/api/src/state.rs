//! Shared application state.

use std::sync::Arc;

use fulfillment::{EmailSender, FulfillmentOrchestrator, LineItemProvider};
use store::{Catalog, FulfillmentStore, LicenseStore};

/// Storage backends the server can run on.
pub trait AppStore: FulfillmentStore + LicenseStore + Catalog + Clone + 'static {}

impl<T> AppStore for T where T: FulfillmentStore + LicenseStore + Catalog + Clone + 'static {}

/// Orchestrator with collaborators picked at startup.
pub type Orchestrator<S> =
    FulfillmentOrchestrator<S, Arc<dyn LineItemProvider>, Arc<dyn EmailSender>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub orchestrator: Orchestrator<S>,
    /// Unset means every webhook is rejected with a server error.
    pub webhook_secret: Option<String>,
}

impl<S: AppStore> AppState<S> {
    pub fn new(
        store: S,
        line_items: Arc<dyn LineItemProvider>,
        email: Arc<dyn EmailSender>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            orchestrator: FulfillmentOrchestrator::new(store, line_items, email),
            webhook_secret,
        }
    }
}
