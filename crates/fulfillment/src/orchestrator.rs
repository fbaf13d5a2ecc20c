//! Drives one delivery of a completed checkout through fulfillment.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use common::SessionId;
use store::{Catalog, FulfillmentRecord, FulfillmentStore, LicenseRecord, LicenseStore};

use crate::error::{FulfillmentError, Result};
use crate::event::CheckoutCompleted;
use crate::inventory::InventoryDecrementer;
use crate::issuer::LicenseIssuer;
use crate::line_items::{product_refs, resolve};
use crate::notifier::NotificationDispatcher;
use crate::services::{EmailSender, LineItemProvider};
use crate::tracker::{FulfillmentTracker, StartOutcome};

/// Failure message recorded when the checkout carries no email.
pub const MISSING_EMAIL_MESSAGE: &str = "missing customer email";

/// How a delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// The session had already been completed by an earlier delivery.
    AlreadyProcessed,
    /// Nothing in the checkout is licensable.
    NoLicenses,
    /// The session holds `count` licenses in total.
    LicensesCreated { count: usize },
}

impl FulfillmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentOutcome::AlreadyProcessed => "already_processed",
            FulfillmentOutcome::NoLicenses => "no_licenses",
            FulfillmentOutcome::LicensesCreated { .. } => "licenses_created",
        }
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            FulfillmentOutcome::LicensesCreated { count } => Some(*count),
            _ => None,
        }
    }
}

impl fmt::Display for FulfillmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session's fulfillment record together with its licenses.
#[derive(Debug, Clone)]
pub struct FulfillmentSnapshot {
    pub record: FulfillmentRecord,
    pub licenses: Vec<LicenseRecord>,
}

/// Sequences the fulfillment components for each delivery.
///
/// Deliveries for the same session may run concurrently; the store's
/// constraints keep the result identical to a single delivery.
pub struct FulfillmentOrchestrator<S, L, E> {
    store: S,
    tracker: FulfillmentTracker<S>,
    issuer: LicenseIssuer<S>,
    inventory: InventoryDecrementer<S>,
    notifier: NotificationDispatcher<S, E>,
    line_items: L,
}

impl<S, L, E> FulfillmentOrchestrator<S, L, E>
where
    S: FulfillmentStore + LicenseStore + Catalog + Clone,
    L: LineItemProvider,
    E: EmailSender,
{
    pub fn new(store: S, line_items: L, email: E) -> Self {
        Self {
            tracker: FulfillmentTracker::new(store.clone()),
            issuer: LicenseIssuer::new(store.clone()),
            inventory: InventoryDecrementer::new(store.clone()),
            notifier: NotificationDispatcher::new(store.clone(), email),
            store,
            line_items,
        }
    }

    /// Fulfills a completed checkout. Safe to call any number of times for
    /// the same session.
    #[tracing::instrument(
        skip(self, event),
        fields(session_id = %event.session_id, event_id = %event.event_id)
    )]
    pub async fn fulfill(&self, event: &CheckoutCompleted) -> Result<FulfillmentOutcome> {
        metrics::counter!("fulfillment_deliveries_total").increment(1);
        let started = Instant::now();

        let result = self.run(event).await;

        metrics::histogram!("fulfillment_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(outcome) => {
                metrics::counter!("fulfillment_outcomes_total", "outcome" => outcome.as_str())
                    .increment(1);
                tracing::info!(outcome = %outcome, count = outcome.count(), "delivery handled");
            }
            Err(e) => {
                metrics::counter!("fulfillment_failures_total", "kind" => e.kind()).increment(1);
                tracing::error!(error = %e, "fulfillment failed");
            }
        }
        result
    }

    /// Loads a session's record and licenses, if the session is known.
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<Option<FulfillmentSnapshot>> {
        let Some(record) = self.tracker.get(session_id).await? else {
            return Ok(None);
        };
        let licenses = self.store.licenses_for_session(session_id).await?;
        Ok(Some(FulfillmentSnapshot { record, licenses }))
    }

    async fn run(&self, event: &CheckoutCompleted) -> Result<FulfillmentOutcome> {
        let session_id = &event.session_id;

        match self.tracker.start(session_id, &event.event_id).await? {
            StartOutcome::AlreadyCompleted(_) => return Ok(FulfillmentOutcome::AlreadyProcessed),
            StartOutcome::Started(record) => {
                tracing::debug!(attempt = record.attempt_count, "processing session");
            }
        }

        let Some(customer_email) = event.customer_email() else {
            self.tracker.mark_failed(session_id, MISSING_EMAIL_MESSAGE).await;
            return Err(FulfillmentError::MissingCustomerEmail);
        };

        match self.process(event, customer_email).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.tracker.mark_failed(session_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        event: &CheckoutCompleted,
        customer_email: &str,
    ) -> Result<FulfillmentOutcome> {
        let session_id = &event.session_id;

        let raw_items = self.line_items.line_items(session_id).await?;
        let items = resolve(&raw_items)?;
        if items.is_empty() {
            self.tracker.mark_completed(session_id).await?;
            return Ok(FulfillmentOutcome::NoLicenses);
        }

        let refs = product_refs(&items);
        let products: HashMap<_, _> = self
            .store
            .products_by_refs(&refs)
            .await?
            .into_iter()
            .map(|p| (p.slug.clone(), p))
            .collect();
        let unknown: Vec<String> = refs
            .into_iter()
            .filter(|r| !products.contains_key(r))
            .collect();
        if !unknown.is_empty() {
            return Err(FulfillmentError::UnknownProducts(unknown));
        }

        let issued = self
            .issuer
            .issue(session_id, customer_email, &items, &products)
            .await?;
        if issued.licenses.is_empty() {
            self.tracker.mark_completed(session_id).await?;
            return Ok(FulfillmentOutcome::NoLicenses);
        }

        self.inventory
            .decrement_once(session_id, &items, &products)
            .await;
        self.notifier
            .notify_once(event, customer_email, &issued.licenses, &products)
            .await;

        self.tracker.mark_completed(session_id).await?;
        Ok(FulfillmentOutcome::LicensesCreated {
            count: issued.licenses.len(),
        })
    }
}
