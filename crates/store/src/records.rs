//! Records persisted by the fulfillment store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{LicenseId, ProductId, SessionId};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Source tag stored on every license issued from an online purchase.
pub const LICENSE_SOURCE_ONLINE_PURCHASE: &str = "online_purchase";

/// Processing status of a purchase session.
///
/// State transitions:
/// ```text
/// (none) ──► Processing ──┬──► Completed
///               ▲         └──► Failed
///               └──────────────────┘   (redelivery)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Processing,
    Completed,
    Failed,
}

impl FulfillmentStatus {
    /// Returns true if a redelivery may move the record back to Processing.
    pub fn can_restart(&self) -> bool {
        !matches!(self, FulfillmentStatus::Completed)
    }

    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Processing => "processing",
            FulfillmentStatus::Completed => "completed",
            FulfillmentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FulfillmentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(FulfillmentStatus::Processing),
            "completed" => Ok(FulfillmentStatus::Completed),
            "failed" => Ok(FulfillmentStatus::Failed),
            other => Err(StoreError::InvalidData(format!(
                "unknown fulfillment status '{other}'"
            ))),
        }
    }
}

/// Write-once timestamp fields on a fulfillment record used to gate side
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimField {
    StockDecrementedAt,
    EmailSentAt,
}

impl ClaimField {
    /// Column backing this claim flag.
    pub fn column(&self) -> &'static str {
        match self {
            ClaimField::StockDecrementedAt => "stock_decremented_at",
            ClaimField::EmailSentAt => "email_sent_at",
        }
    }
}

impl std::fmt::Display for ClaimField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Durable processing state for one purchase session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    pub session_id: SessionId,
    /// Last event that drove processing of this session.
    pub event_id: String,
    pub status: FulfillmentStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub stock_decremented_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FulfillmentRecord {
    /// A freshly started record, as inserted on first delivery.
    pub fn started(session_id: SessionId, event_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            event_id: event_id.into(),
            status: FulfillmentStatus::Processing,
            attempt_count: 1,
            last_error: None,
            stock_decremented_at: None,
            email_sent_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the value of a claim flag.
    pub fn claimed_at(&self, field: ClaimField) -> Option<DateTime<Utc>> {
        match field {
            ClaimField::StockDecrementedAt => self.stock_decremented_at,
            ClaimField::EmailSentAt => self.email_sent_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FulfillmentStatus::Completed
    }
}

/// Ownership status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// Issued but not yet associated with an account.
    Pending,
    /// Claimed by a customer with its claim token.
    Claimed,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Pending => "pending",
            LicenseStatus::Claimed => "claimed",
        }
    }
}

impl FromStr for LicenseStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LicenseStatus::Pending),
            "claimed" => Ok(LicenseStatus::Claimed),
            other => Err(StoreError::InvalidData(format!(
                "unknown license status '{other}'"
            ))),
        }
    }
}

/// A redeemable license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub id: LicenseId,
    pub code: String,
    pub product_id: ProductId,
    /// Never set by the purchase pipeline; filled in by the claim flow.
    pub owner_id: Option<String>,
    pub source: String,
    pub session_id: Option<SessionId>,
    pub customer_email: Option<String>,
    pub claim_token: String,
    pub status: LicenseStatus,
    /// Idempotency key `<session>:<line item>:<unit>`. Null on legacy rows.
    pub purchase_item_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A license row to be inserted by the issuer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLicense {
    pub id: LicenseId,
    pub code: String,
    pub product_id: ProductId,
    pub session_id: SessionId,
    pub customer_email: String,
    pub claim_token: String,
    pub purchase_item_ref: String,
}

impl NewLicense {
    /// Converts the insert into the record the store persists: pending,
    /// unowned, sourced from an online purchase.
    pub fn into_record(self, created_at: DateTime<Utc>) -> LicenseRecord {
        LicenseRecord {
            id: self.id,
            code: self.code,
            product_id: self.product_id,
            owner_id: None,
            source: LICENSE_SOURCE_ONLINE_PURCHASE.to_string(),
            session_id: Some(self.session_id),
            customer_email: Some(self.customer_email),
            claim_token: self.claim_token,
            status: LicenseStatus::Pending,
            purchase_item_ref: Some(self.purchase_item_ref),
            created_at,
        }
    }
}

/// Read-only catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    /// Reference used by provider line item metadata.
    pub slug: String,
    pub name: String,
    pub track_inventory: bool,
    pub stock_quantity: Option<i32>,
}

impl ProductRecord {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ProductId::new(),
            slug: slug.into(),
            name: name.into(),
            track_inventory: false,
            stock_quantity: None,
        }
    }

    /// Enables inventory tracking with the given stock level.
    pub fn with_stock(mut self, quantity: i32) -> Self {
        self.track_inventory = true;
        self.stock_quantity = Some(quantity);
        self
    }

    /// Returns true if purchases of this product should decrement stock.
    pub fn decrements_stock(&self) -> bool {
        self.track_inventory && self.stock_quantity.is_some()
    }
}
