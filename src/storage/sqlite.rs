use crate::analytics::{ClickEvent, DetailedRow, ReportFilter, SummaryRow};
use crate::models::{Binding, NewBinding, PoolEntry, PoolStats};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

const BINDING_COLUMNS: &str = "id, long_url, code, expires_at, domain, sender_id, created_by, campaign_name, disabled, created_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Every connection to an in-memory database is a separate database,
        // so those run on a single connection that is never recycled.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };
        let pool = options.connect(database_url).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Pre-provisioned code pool
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shortcodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                status INTEGER NOT NULL DEFAULT 0,
                taken_at INTEGER
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
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                long_url TEXT NOT NULL,
                code TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                domain TEXT NOT NULL,
                sender_id TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL,
                campaign_name TEXT NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
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
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                binding_id INTEGER NOT NULL,
                code TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 1,
                ip TEXT NOT NULL,
                device TEXT NOT NULL,
                country_code TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                postal_code TEXT NOT NULL DEFAULT '',
                latitude REAL NOT NULL DEFAULT 0,
                longitude REAL NOT NULL DEFAULT 0,
                organization TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL DEFAULT '',
                recorded_at INTEGER NOT NULL
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
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for code in codes {
            let result = sqlx::query(
                r#"
                INSERT INTO shortcodes (code, status)
                VALUES (?, 0)
                ON CONFLICT(code) DO NOTHING
                "#,
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn claim_codes(&self, count: u32) -> StorageResult<Vec<PoolEntry>> {
        // A write statement takes the database write lock before it evaluates
        // the subquery, so two claimants never see the same available rows.
        let mut entries = sqlx::query_as::<_, PoolEntry>(
            r#"
            UPDATE shortcodes
            SET status = 1, taken_at = ?
            WHERE id IN (
                SELECT id FROM shortcodes
                WHERE status = 0
                ORDER BY id
                LIMIT ?
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
                COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0) AS available,
                COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0) AS taken
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
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
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
        // Single statement: the existence check and the insert share one write lock
        let row = sqlx::query_as::<_, Binding>(&format!(
            r#"
            INSERT INTO bindings
                (long_url, code, expires_at, domain, sender_id, created_by, campaign_name, disabled, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, 0, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM bindings
                WHERE code = ? AND disabled = 0 AND expires_at > ?
            )
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
        .bind(&binding.code)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.ok_or(StorageError::Conflict)
    }

    async fn find_active_binding(&self, code: &str, now: i64) -> StorageResult<Option<Binding>> {
        let binding = sqlx::query_as::<_, Binding>(&format!(
            r#"
            SELECT {BINDING_COLUMNS}
            FROM bindings
            WHERE code = ? AND disabled = 0 AND expires_at > ?
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
            SET disabled = ?
            WHERE code = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT c.code AS shortcode, b.campaign_name AS campaign_name, SUM(c.clicks) AS clicks
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
        let mut query = QueryBuilder::<Sqlite>::new(
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

/// SQLite LIKE is case-insensitive for ASCII; the escape character must be declared
fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ReportFilter) {
    if let Some(pattern) = filter.campaign_pattern() {
        query
            .push(" AND b.campaign_name LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\'");
    }
    if let Some(pattern) = filter.code_pattern() {
        query
            .push(" AND c.code LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::GeoRecord;
    use std::collections::HashSet;

    async fn setup() -> Arc<SqliteStorage> {
        let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
        storage.init().await.unwrap();
        Arc::new(storage)
    }

    fn new_binding(code: &str, expires_at: i64) -> NewBinding {
        NewBinding {
            long_url: format!("https://example.com/{code}"),
            code: code.to_string(),
            expires_at,
            domain: "https://s.example/".to_string(),
            sender_id: String::new(),
            created_by: "tester".to_string(),
            campaign_name: "spring".to_string(),
        }
    }

    fn codes(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i:03}")).collect()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let storage = setup().await;
        storage.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_seed_skips_duplicates() {
        let storage = setup().await;
        assert_eq!(storage.seed_codes(&codes("a", 3)).await.unwrap(), 3);
        assert_eq!(storage.seed_codes(&codes("a", 5)).await.unwrap(), 2);

        let stats = storage.pool_stats().await.unwrap();
        assert_eq!(stats, PoolStats { total: 5, available: 5, taken: 0 });
    }

    #[tokio::test]
    async fn test_claim_takes_oldest_first() {
        let storage = setup().await;
        storage.seed_codes(&codes("c", 5)).await.unwrap();

        let first = storage.claim_codes(2).await.unwrap();
        let claimed: Vec<&str> = first.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(claimed, vec!["c000", "c001"]);
        assert!(first.iter().all(|e| e.taken_at.is_some()));

        let second = storage.claim_codes(10).await.unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].code, "c002");

        assert!(storage.claim_codes(1).await.unwrap().is_empty());
        let stats = storage.pool_stats().await.unwrap();
        assert_eq!(stats.taken, 5);
        assert_eq!(stats.available, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_overlap() {
        // A file database gives each claimant its own connection
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("pool.db").display());
        let storage = Arc::new(SqliteStorage::new(&url, 8).await.unwrap());
        storage.init().await.unwrap();
        storage.seed_codes(&codes("p", 40)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move { storage.claim_codes(4).await }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            let entries = handle.await.unwrap().unwrap();
            for entry in entries {
                total += 1;
                assert!(seen.insert(entry.code.clone()), "code {} claimed twice", entry.code);
            }
        }

        assert_eq!(total, 40);
        let stats = storage.pool_stats().await.unwrap();
        assert_eq!(stats.taken as usize, total, "every taken code must have been handed out");
        assert_eq!(stats.available, 0);
    }

    #[tokio::test]
    async fn test_find_active_binding_ignores_expired_and_disabled() {
        let storage = setup().await;
        let now = now_secs();

        storage.insert_binding(&new_binding("old", now - 10)).await.unwrap();
        assert!(storage.find_active_binding("old", now).await.unwrap().is_none());

        storage.insert_binding(&new_binding("live", now + 3600)).await.unwrap();
        assert!(storage.find_active_binding("live", now).await.unwrap().is_some());

        assert_eq!(storage.set_binding_disabled("live", true).await.unwrap(), 1);
        assert!(storage.find_active_binding("live", now).await.unwrap().is_none());

        storage.set_binding_disabled("live", false).await.unwrap();
        assert!(storage.find_active_binding("live", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_newest_active_binding_wins() {
        let storage = setup().await;
        let now = now_secs();

        storage.insert_binding(&new_binding("dup", now + 3600)).await.unwrap();
        let mut second = new_binding("dup", now + 7200);
        second.long_url = "https://example.com/newer".to_string();
        let newer = storage.insert_binding(&second).await.unwrap();

        let found = storage.find_active_binding("dup", now).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert_eq!(found.long_url, "https://example.com/newer");
    }

    #[tokio::test]
    async fn test_exclusive_insert_conflicts_only_with_active() {
        let storage = setup().await;
        let now = now_secs();

        storage.insert_binding(&new_binding("promo", now - 1)).await.unwrap();
        storage
            .insert_binding_exclusive(&new_binding("promo", now + 60), now)
            .await
            .expect("expired binding must not block a new one");

        let err = storage
            .insert_binding_exclusive(&new_binding("promo", now + 60), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn test_reports_join_clicks_to_their_binding() {
        let storage = setup().await;
        let now = now_secs();

        // An expired binding and a live one share the code but not the campaign
        let mut old = new_binding("shared", now - 10);
        old.campaign_name = "winter".to_string();
        storage.insert_binding(&old).await.unwrap();
        let live = storage.insert_binding(&new_binding("shared", now + 60)).await.unwrap();

        for _ in 0..2 {
            storage
                .append_click(&ClickEvent {
                    binding_id: live.id,
                    code: "shared".to_string(),
                    clicks: 1,
                    ip: "198.51.100.4".to_string(),
                    device: "test-agent".to_string(),
                    geo: GeoRecord {
                        country_code: Some("IN".to_string()),
                        city: Some("Pune".to_string()),
                        ..Default::default()
                    },
                    recorded_at: now,
                })
                .await
                .unwrap();
        }

        let summary = storage.summary_report(&ReportFilter::default()).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].campaign_name, "spring");
        assert_eq!(summary[0].clicks, 2);

        let detailed = storage
            .detailed_report(&ReportFilter::new(Some("SPR".to_string()), None))
            .await
            .unwrap();
        assert_eq!(detailed.len(), 2);
        assert_eq!(detailed[0].city, "Pune");
        assert_eq!(detailed[0].region, "");
        assert_eq!(detailed[0].latitude, 0.0);

        let none = storage
            .summary_report(&ReportFilter::new(Some("winter".to_string()), None))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
