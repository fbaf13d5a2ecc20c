//! HTTP API server for purchase fulfillment.
//!
//! Receives Stripe checkout webhooks and fulfills them idempotently, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod signature;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{
    EmailSender, InMemoryEmailSender, InMemoryLineItemProvider, LineItemProvider,
    ResendEmailSender, StripeLineItemProvider,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
pub use state::{AppState, AppStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: AppStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/webhooks/stripe", post(routes::webhook::receive::<S>))
        .route(
            "/fulfillments/{session_id}",
            get(routes::fulfillments::get::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state, choosing production collaborators where
/// the configuration provides credentials and in-memory ones otherwise.
pub fn create_default_state<S: AppStore>(store: S, config: &Config) -> Arc<AppState<S>> {
    let line_items: Arc<dyn LineItemProvider> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeLineItemProvider::new(key.clone())),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, using in-memory line item provider");
            Arc::new(InMemoryLineItemProvider::new())
        }
    };

    let email: Arc<dyn EmailSender> = match (&config.resend_api_key, &config.email_from) {
        (Some(key), Some(from)) => Arc::new(ResendEmailSender::new(key.clone(), from.clone())),
        _ => {
            tracing::warn!("RESEND_API_KEY or EMAIL_FROM not set, confirmations are only logged");
            Arc::new(InMemoryEmailSender::new())
        }
    };

    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhooks will be rejected");
    }

    Arc::new(AppState::new(
        store,
        line_items,
        email,
        config.stripe_webhook_secret.clone(),
    ))
}
