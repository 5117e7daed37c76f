use crate::analytics::{ClickEvent, DetailedRow, ReportFilter, SummaryRow};
use crate::models::{Binding, NewBinding, PoolEntry, PoolStats};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already bound to an active destination")]
    Conflict,
    #[error("storage operation timed out")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Run a store call under a deadline.
///
/// The wrapped future is dropped on timeout; any rows it already committed stay committed.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StorageError::Timeout)?
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Close the underlying connection pool
    async fn close(&self);

    // Code pool

    /// Add codes to the pool as available, skipping codes that already exist.
    /// Returns how many were inserted.
    async fn seed_codes(&self, codes: &[String]) -> Result<u64>;

    /// Atomically mark up to `count` of the oldest available codes as taken and return them.
    ///
    /// Concurrent callers never receive the same entry.
    async fn claim_codes(&self, count: u32) -> StorageResult<Vec<PoolEntry>>;

    async fn pool_stats(&self) -> Result<PoolStats>;

    // Bindings

    async fn insert_binding(&self, binding: &NewBinding) -> StorageResult<Binding>;

    /// Insert only if no binding for the same code is active at `now`.
    /// Fails with [`StorageError::Conflict`] otherwise.
    async fn insert_binding_exclusive(
        &self,
        binding: &NewBinding,
        now: i64,
    ) -> StorageResult<Binding>;

    /// Newest binding for `code` that is neither disabled nor expired at `now`
    async fn find_active_binding(&self, code: &str, now: i64) -> StorageResult<Option<Binding>>;

    /// Set or clear the operator disable flag on every binding for `code`.
    /// Returns the number of bindings touched.
    async fn set_binding_disabled(&self, code: &str, disabled: bool) -> Result<u64>;

    // Click ledger

    async fn append_click(&self, click: &ClickEvent) -> Result<()>;

    async fn summary_report(&self, filter: &ReportFilter) -> Result<Vec<SummaryRow>>;

    async fn detailed_report(&self, filter: &ReportFilter) -> Result<Vec<DetailedRow>>;
}
