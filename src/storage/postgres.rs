use crate::analytics::{ClickEvent, DetailedRow, ReportFilter, SummaryRow};
use crate::models::{Binding, NewBinding, PoolEntry, PoolStats};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

const BINDING_COLUMNS: &str = "id, long_url, code, expires_at, domain, sender_id, created_by, campaign_name, disabled, created_at";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shortcodes (
                id BIGSERIAL PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                status INTEGER NOT NULL DEFAULT 0,
                taken_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shortcodes_status ON shortcodes(status, id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bindings (
                id BIGSERIAL PRIMARY KEY,
                long_url TEXT NOT NULL,
                code TEXT NOT NULL,
                expires_at BIGINT NOT NULL,
                domain TEXT NOT NULL,
                sender_id TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL,
                campaign_name TEXT NOT NULL,
                disabled BOOLEAN NOT NULL DEFAULT FALSE,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bindings_code ON bindings(code, expires_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id BIGSERIAL PRIMARY KEY,
                binding_id BIGINT NOT NULL,
                code TEXT NOT NULL,
                clicks BIGINT NOT NULL DEFAULT 1,
                ip TEXT NOT NULL,
                device TEXT NOT NULL,
                country_code TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                postal_code TEXT NOT NULL DEFAULT '',
                latitude DOUBLE PRECISION NOT NULL DEFAULT 0,
                longitude DOUBLE PRECISION NOT NULL DEFAULT 0,
                organization TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL DEFAULT '',
                recorded_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_code ON clicks(code)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_binding ON clicks(binding_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn seed_codes(&self, codes: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO shortcodes (code, status)
            SELECT code, 0 FROM UNNEST($1::text[]) WITH ORDINALITY AS t(code, ord)
            ORDER BY ord
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(codes)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn claim_codes(&self, count: u32) -> StorageResult<Vec<PoolEntry>> {
        // SKIP LOCKED lets concurrent claimants take disjoint rows instead of
        // queueing behind (or re-reading) each other's selection.
        let mut entries = sqlx::query_as::<_, PoolEntry>(
            r#"
            UPDATE shortcodes
            SET status = 1, taken_at = $1
            WHERE id IN (
                SELECT id FROM shortcodes
                WHERE status = 0
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, code, status, taken_at
            "#,
        )
        .bind(now_secs())
        .bind(i64::from(count))
        .fetch_all(self.pool.as_ref())
        .await?;

        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    async fn pool_stats(&self) -> Result<PoolStats> {
        let stats = sqlx::query_as::<_, PoolStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 0) AS available,
                COUNT(*) FILTER (WHERE status = 1) AS taken
            FROM shortcodes
            "#,
        )
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(stats)
    }

    async fn insert_binding(&self, binding: &NewBinding) -> StorageResult<Binding> {
        let row = sqlx::query_as::<_, Binding>(&format!(
            r#"
            INSERT INTO bindings
                (long_url, code, expires_at, domain, sender_id, created_by, campaign_name, disabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            RETURNING {BINDING_COLUMNS}
            "#
        ))
        .bind(&binding.long_url)
        .bind(&binding.code)
        .bind(binding.expires_at)
        .bind(&binding.domain)
        .bind(&binding.sender_id)
        .bind(&binding.created_by)
        .bind(&binding.campaign_name)
        .bind(now_secs())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    async fn insert_binding_exclusive(
        &self,
        binding: &NewBinding,
        now: i64,
    ) -> StorageResult<Binding> {
        let mut tx = self.pool.begin().await?;

        // Serialize writers of the same code for the rest of this transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&binding.code)
            .execute(&mut *tx)
            .await?;

        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bindings
                WHERE code = $1 AND disabled = FALSE AND expires_at > $2
            )
            "#,
        )
        .bind(&binding.code)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if taken {
            return Err(StorageError::Conflict);
        }

        let row = sqlx::query_as::<_, Binding>(&format!(
            r#"
            INSERT INTO bindings
                (long_url, code, expires_at, domain, sender_id, created_by, campaign_name, disabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            RETURNING {BINDING_COLUMNS}
            "#
        ))
        .bind(&binding.long_url)
        .bind(&binding.code)
        .bind(binding.expires_at)
        .bind(&binding.domain)
        .bind(&binding.sender_id)
        .bind(&binding.created_by)
        .bind(&binding.campaign_name)
        .bind(now_secs())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn find_active_binding(&self, code: &str, now: i64) -> StorageResult<Option<Binding>> {
        let binding = sqlx::query_as::<_, Binding>(&format!(
            r#"
            SELECT {BINDING_COLUMNS}
            FROM bindings
            WHERE code = $1 AND disabled = FALSE AND expires_at > $2
            ORDER BY id DESC
            LIMIT 1
            "#
        ))
        .bind(code)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(binding)
    }

    async fn set_binding_disabled(&self, code: &str, disabled: bool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bindings
            SET disabled = $1
            WHERE code = $2
            "#,
        )
        .bind(disabled)
        .bind(code)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn append_click(&self, click: &ClickEvent) -> Result<()> {
        let geo = &click.geo;
        sqlx::query(
            r#"
            INSERT INTO clicks
                (binding_id, code, clicks, ip, device, country_code, country, region, city,
                 postal_code, latitude, longitude, organization, timezone, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(click.binding_id)
        .bind(&click.code)
        .bind(click.clicks)
        .bind(&click.ip)
        .bind(&click.device)
        .bind(geo.country_code.as_deref().unwrap_or_default())
        .bind(geo.country.as_deref().unwrap_or_default())
        .bind(geo.region.as_deref().unwrap_or_default())
        .bind(geo.city.as_deref().unwrap_or_default())
        .bind(geo.postal_code.as_deref().unwrap_or_default())
        .bind(geo.latitude.unwrap_or_default())
        .bind(geo.longitude.unwrap_or_default())
        .bind(geo.organization.as_deref().unwrap_or_default())
        .bind(geo.timezone.as_deref().unwrap_or_default())
        .bind(click.recorded_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn summary_report(&self, filter: &ReportFilter) -> Result<Vec<SummaryRow>> {
        let mut query = QueryBuilder::<Postgres>::new(
            r#"
            SELECT c.code AS shortcode, b.campaign_name AS campaign_name, SUM(c.clicks)::BIGINT AS clicks
            FROM clicks c
            JOIN bindings b ON b.id = c.binding_id
            WHERE 1 = 1
            "#,
        );
        push_filters(&mut query, filter);
        query.push(" GROUP BY c.code, b.campaign_name ORDER BY c.code");

        let rows = query
            .build_query_as::<SummaryRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }

    async fn detailed_report(&self, filter: &ReportFilter) -> Result<Vec<DetailedRow>> {
        let mut query = QueryBuilder::<Postgres>::new(
            r#"
            SELECT c.code AS shortcode, b.campaign_name AS campaign_name, c.clicks, c.ip, c.device,
                   c.country_code, c.country, c.region, c.city, c.postal_code, c.latitude,
                   c.longitude, c.organization, c.timezone, c.recorded_at
            FROM clicks c
            JOIN bindings b ON b.id = c.binding_id
            WHERE 1 = 1
            "#,
        );
        push_filters(&mut query, filter);
        query.push(" ORDER BY c.recorded_at DESC, c.id DESC");

        let rows = query
            .build_query_as::<DetailedRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }
}

/// ILIKE already treats backslash as its escape character
fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    if let Some(pattern) = filter.campaign_pattern() {
        query.push(" AND b.campaign_name ILIKE ").push_bind(pattern);
    }
    if let Some(pattern) = filter.code_pattern() {
        query.push(" AND c.code ILIKE ").push_bind(pattern);
    }
}
