use crate::analytics::{ClickEvent, DetailedRow, ReportFilter, SummaryRow};
use crate::models::{Binding, NewBinding, PoolEntry, PoolStats};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper that caches active binding lookups for the redirect path.
///
/// Only live bindings are cached. A hit is re-checked against the caller's
/// clock, so expiry takes effect on time even while the entry is cached.
/// Writes that touch a code invalidate its entry in this process.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    read_cache: Cache<String, Binding>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, read_cache }
    }

    async fn invalidate_cache(&self, code: &str) {
        self.read_cache.invalidate(code).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn close(&self) {
        self.read_cache.invalidate_all();
        self.inner.close().await;
    }

    async fn seed_codes(&self, codes: &[String]) -> Result<u64> {
        self.inner.seed_codes(codes).await
    }

    async fn claim_codes(&self, count: u32) -> StorageResult<Vec<PoolEntry>> {
        self.inner.claim_codes(count).await
    }

    async fn pool_stats(&self) -> Result<PoolStats> {
        self.inner.pool_stats().await
    }

    async fn insert_binding(&self, binding: &NewBinding) -> StorageResult<Binding> {
        let row = self.inner.insert_binding(binding).await?;
        self.invalidate_cache(&binding.code).await;
        Ok(row)
    }

    async fn insert_binding_exclusive(
        &self,
        binding: &NewBinding,
        now: i64,
    ) -> StorageResult<Binding> {
        let row = self.inner.insert_binding_exclusive(binding, now).await?;
        self.invalidate_cache(&binding.code).await;
        Ok(row)
    }

    async fn find_active_binding(&self, code: &str, now: i64) -> StorageResult<Option<Binding>> {
        if let Some(binding) = self.read_cache.get(code).await {
            if binding.is_active_at(now) {
                return Ok(Some(binding));
            }
            self.invalidate_cache(code).await;
        }

        let binding = self.inner.find_active_binding(code, now).await?;
        if let Some(ref found) = binding {
            self.read_cache
                .insert(code.to_string(), found.clone())
                .await;
        }

        Ok(binding)
    }

    async fn set_binding_disabled(&self, code: &str, disabled: bool) -> Result<u64> {
        let touched = self.inner.set_binding_disabled(code, disabled).await?;
        self.invalidate_cache(code).await;
        Ok(touched)
    }

    async fn append_click(&self, click: &ClickEvent) -> Result<()> {
        self.inner.append_click(click).await
    }

    async fn summary_report(&self, filter: &ReportFilter) -> Result<Vec<SummaryRow>> {
        self.inner.summary_report(filter).await
    }

    async fn detailed_report(&self, filter: &ReportFilter) -> Result<Vec<DetailedRow>> {
        self.inner.detailed_report(filter).await
    }
}
