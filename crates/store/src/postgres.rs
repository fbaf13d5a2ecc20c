use async_trait::async_trait;
use common::{LicenseId, ProductId, SessionId};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Catalog, ClaimField, FulfillmentRecord, FulfillmentStore, LICENSE_SOURCE_ONLINE_PURCHASE,
    LicenseRecord, LicenseStatus, LicenseStore, NewLicense, ProductRecord, Result, StoreError,
};

const FULFILLMENT_COLUMNS: &str = "session_id, event_id, status, attempt_count, last_error, \
     stock_decremented_at, email_sent_at, processed_at, created_at, updated_at";

const LICENSE_COLUMNS: &str = "id, code, product_id, owner_id, source, session_id, \
     customer_email, claim_token, status, purchase_item_ref, created_at";

/// PostgreSQL-backed fulfillment store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_fulfillment(row: PgRow) -> Result<FulfillmentRecord> {
        let status: String = row.try_get("status")?;
        Ok(FulfillmentRecord {
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            event_id: row.try_get("event_id")?,
            status: status.parse()?,
            attempt_count: row.try_get("attempt_count")?,
            last_error: row.try_get("last_error")?,
            stock_decremented_at: row.try_get("stock_decremented_at")?,
            email_sent_at: row.try_get("email_sent_at")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_license(row: PgRow) -> Result<LicenseRecord> {
        let status: String = row.try_get("status")?;
        Ok(LicenseRecord {
            id: LicenseId::from_uuid(row.try_get::<Uuid, _>("id")?),
            code: row.try_get("code")?,
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            owner_id: row.try_get("owner_id")?,
            source: row.try_get("source")?,
            session_id: row
                .try_get::<Option<String>, _>("session_id")?
                .map(SessionId::new),
            customer_email: row.try_get("customer_email")?,
            claim_token: row.try_get("claim_token")?,
            status: status.parse::<LicenseStatus>()?,
            purchase_item_ref: row.try_get("purchase_item_ref")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<ProductRecord> {
        Ok(ProductRecord {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            track_inventory: row.try_get("track_inventory")?,
            stock_quantity: row.try_get("stock_quantity")?,
        })
    }
}

/// Maps unique violations to [`StoreError::UniqueViolation`] so callers can
/// tell which constraint rejected the write.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::UniqueViolation {
            constraint: db_err.constraint().unwrap_or_default().to_string(),
        };
    }
    StoreError::Database(e)
}

#[async_trait]
impl FulfillmentStore for PostgresStore {
    async fn insert_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fulfillments (session_id, event_id, status, attempt_count, created_at, updated_at)
            VALUES ($1, $2, 'processing', 1, now(), now())
            ON CONFLICT (session_id) DO NOTHING
            RETURNING {FULFILLMENT_COLUMNS}
            "#
        ))
        .bind(session_id.as_str())
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?;

        row.map(Self::row_to_fulfillment).transpose()
    }

    async fn get_fulfillment(&self, session_id: &SessionId) -> Result<Option<FulfillmentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {FULFILLMENT_COLUMNS} FROM fulfillments WHERE session_id = $1"
        ))
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_fulfillment).transpose()
    }

    async fn restart_fulfillment(
        &self,
        session_id: &SessionId,
        event_id: &str,
    ) -> Result<Option<FulfillmentRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE fulfillments
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                last_error = NULL,
                event_id = $2,
                updated_at = now()
            WHERE session_id = $1 AND status <> 'completed'
            RETURNING {FULFILLMENT_COLUMNS}
            "#
        ))
        .bind(session_id.as_str())
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_fulfillment).transpose()
    }

    async fn mark_fulfillment_failed(&self, session_id: &SessionId, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fulfillments
            SET status = 'failed', last_error = $2, updated_at = now()
            WHERE session_id = $1 AND status <> 'completed'
            "#,
        )
        .bind(session_id.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_fulfillment_completed(&self, session_id: &SessionId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fulfillments
            SET status = 'completed', processed_at = now(), last_error = NULL, updated_at = now()
            WHERE session_id = $1 AND status <> 'completed'
            "#,
        )
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(%session_id, %field))]
    async fn claim_field(&self, session_id: &SessionId, field: ClaimField) -> Result<bool> {
        let column = field.column();
        let result = sqlx::query(&format!(
            "UPDATE fulfillments SET {column} = now(), updated_at = now() \
             WHERE session_id = $1 AND {column} IS NULL"
        ))
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl LicenseStore for PostgresStore {
    async fn licenses_for_session(&self, session_id: &SessionId) -> Result<Vec<LicenseRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LICENSE_COLUMNS}
            FROM licenses
            WHERE session_id = $1
            ORDER BY created_at ASC, purchase_item_ref ASC
            "#
        ))
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_license).collect()
    }

    #[tracing::instrument(skip(self, licenses), fields(batch = licenses.len()))]
    async fn insert_licenses(&self, licenses: &[NewLicense]) -> Result<u64> {
        if licenses.is_empty() {
            return Ok(0);
        }

        // A single multi-row statement, so a collision rolls back the batch.
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO licenses (id, code, product_id, owner_id, source, session_id, \
             customer_email, claim_token, status, purchase_item_ref, created_at) ",
        );
        builder.push_values(licenses, |mut row, license| {
            row.push_bind(license.id.as_uuid())
                .push_bind(&license.code)
                .push_bind(license.product_id.as_uuid())
                .push_bind(None::<String>)
                .push_bind(LICENSE_SOURCE_ONLINE_PURCHASE)
                .push_bind(license.session_id.as_str())
                .push_bind(&license.customer_email)
                .push_bind(&license.claim_token)
                .push_bind(LicenseStatus::Pending.as_str())
                .push_bind(&license.purchase_item_ref)
                .push("now()");
        });
        builder.push(" ON CONFLICT (purchase_item_ref) DO NOTHING");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn products_by_refs(&self, refs: &[String]) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slug, name, track_inventory, stock_quantity
            FROM products
            WHERE slug = ANY($1)
            "#,
        )
        .bind(refs)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn decrement_stock(&self, product_id: ProductId, quantity: i32) -> Result<i32> {
        let stock: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = GREATEST(stock_quantity - $2, 0)
            WHERE id = $1 AND stock_quantity IS NOT NULL
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        stock.ok_or(StoreError::StockNotTracked(product_id))
    }
}
