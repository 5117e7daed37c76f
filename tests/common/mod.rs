//! Shared helpers for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::Request,
    response::Response,
    Router,
};
use shorturl::analytics::{
    ClickEvent, DetailedRow, GeoError, GeoLocator, GeoRecord, ReportFilter, SummaryRow,
};
use shorturl::app::{build_router, Services};
use shorturl::config::Config;
use shorturl::models::{Binding, NewBinding, PoolEntry, PoolStats};
use shorturl::storage::{SqliteStorage, Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::Layer;

pub const TEST_API_KEY: &str = "test-key-123";

/// Configuration with test defaults; `overrides` replaces individual variables
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("DATABASE_URL", "sqlite::memory:"),
        ("API_KEYS", "test-key-123:marketing"),
        ("DEFAULT_DOMAIN", "https://s.example/shorturl/"),
        ("GEOIP_PROVIDER", "none"),
        ("GEOIP_TIMEOUT_MS", "100"),
        ("BINDING_CACHE_TTL_SECS", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }

    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// File-backed SQLite with a real connection pool, so store calls can race.
/// Keep the returned directory alive for as long as the storage is used.
pub async fn create_file_storage(connections: u32) -> (TempDir, Arc<dyn Storage>) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("shorturl.db").display());
    let storage = SqliteStorage::new(&url, connections).await.unwrap();
    storage.init().await.unwrap();
    (dir, Arc::new(storage))
}

pub async fn seed(storage: &Arc<dyn Storage>, codes: &[&str]) {
    let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
    storage.seed_codes(&codes).await.unwrap();
}

pub struct TestApp {
    pub router: Router,
    pub services: Services,
    pub storage: Arc<dyn Storage>,
}

pub fn build_app(config: &Config, storage: Arc<dyn Storage>, geo: Arc<dyn GeoLocator>) -> TestApp {
    let services = Services::build(config, Arc::clone(&storage), geo);
    let router = build_router(config, &services).layer(TestConnectInfoLayer);
    TestApp {
        router,
        services,
        storage,
    }
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll until the ledger holds `expected` rows or the deadline passes
pub async fn wait_for_clicks(storage: &Arc<dyn Storage>, expected: usize) -> Vec<DetailedRow> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let rows = storage
            .detailed_report(&ReportFilter::default())
            .await
            .unwrap();
        if rows.len() >= expected || tokio::time::Instant::now() >= deadline {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
pub struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([203, 0, 113, 50], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

/// Never answers within any sane deadline
pub struct SlowGeoLocator;

#[async_trait]
impl GeoLocator for SlowGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<GeoRecord, GeoError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(GeoRecord::default())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Answers with a body that is not geolocation JSON
pub struct MalformedGeoLocator;

#[async_trait]
impl GeoLocator for MalformedGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<GeoRecord, GeoError> {
        shorturl::analytics::geo::parse_geo_body(b"<html>502 Bad Gateway</html>")
    }

    fn name(&self) -> &'static str {
        "malformed"
    }
}

pub struct FixedGeoLocator(pub GeoRecord);

#[async_trait]
impl GeoLocator for FixedGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<GeoRecord, GeoError> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Storage wrapper that logs which operations were called and can fail
/// binding writes on demand.
pub struct RecordingStorage {
    inner: Arc<dyn Storage>,
    calls: Mutex<Vec<&'static str>>,
    /// Fail every binding write whose ordinal (starting at 0) is in this list
    failing_writes: Vec<usize>,
    writes: AtomicUsize,
}

impl RecordingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self::failing_binding_writes(inner, Vec::new())
    }

    pub fn failing_binding_writes(inner: Arc<dyn Storage>, failing_writes: Vec<usize>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            failing_writes,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }

    fn next_write_fails(&self) -> bool {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        self.failing_writes.contains(&n)
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn init(&self) -> anyhow::Result<()> {
        self.log("init");
        self.inner.init().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    async fn seed_codes(&self, codes: &[String]) -> anyhow::Result<u64> {
        self.log("seed_codes");
        self.inner.seed_codes(codes).await
    }

    async fn claim_codes(&self, count: u32) -> StorageResult<Vec<PoolEntry>> {
        self.log("claim_codes");
        self.inner.claim_codes(count).await
    }

    async fn pool_stats(&self) -> anyhow::Result<PoolStats> {
        self.log("pool_stats");
        self.inner.pool_stats().await
    }

    async fn insert_binding(&self, binding: &NewBinding) -> StorageResult<Binding> {
        self.log("insert_binding");
        if self.next_write_fails() {
            return Err(StorageError::Other(anyhow::anyhow!("injected write failure")));
        }
        self.inner.insert_binding(binding).await
    }

    async fn insert_binding_exclusive(
        &self,
        binding: &NewBinding,
        now: i64,
    ) -> StorageResult<Binding> {
        self.log("insert_binding_exclusive");
        if self.next_write_fails() {
            return Err(StorageError::Other(anyhow::anyhow!("injected write failure")));
        }
        self.inner.insert_binding_exclusive(binding, now).await
    }

    async fn find_active_binding(&self, code: &str, now: i64) -> StorageResult<Option<Binding>> {
        self.log("find_active_binding");
        self.inner.find_active_binding(code, now).await
    }

    async fn set_binding_disabled(&self, code: &str, disabled: bool) -> anyhow::Result<u64> {
        self.log("set_binding_disabled");
        self.inner.set_binding_disabled(code, disabled).await
    }

    async fn append_click(&self, click: &ClickEvent) -> anyhow::Result<()> {
        self.log("append_click");
        self.inner.append_click(click).await
    }

    async fn summary_report(&self, filter: &ReportFilter) -> anyhow::Result<Vec<SummaryRow>> {
        self.log("summary_report");
        self.inner.summary_report(filter).await
    }

    async fn detailed_report(&self, filter: &ReportFilter) -> anyhow::Result<Vec<DetailedRow>> {
        self.log("detailed_report");
        self.inner.detailed_report(filter).await
    }
}
