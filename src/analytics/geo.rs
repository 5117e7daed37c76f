//! Geolocation enrichment for visitor addresses
//!
//! Lookups are best effort. Callers bound them with a timeout and fall back
//! to an empty [`GeoRecord`] on any error.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analytics::maxmind::MaxMindGeoLocator;
use crate::analytics::models::GeoRecord;
use crate::config::{AnalyticsConfig, GeoProvider};

/// Successful HTTP lookups are kept for this long
const GEO_CACHE_TTL_SECS: u64 = 15 * 60;
const GEO_CACHE_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geolocation service answered with status {0}")]
    Status(u16),
    #[error("malformed geolocation response: {0}")]
    Malformed(String),
    #[error("no geolocation data for address")]
    NotFound,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoRecord, GeoError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// Locator used when enrichment is switched off
pub struct DisabledGeoLocator;

#[async_trait]
impl GeoLocator for DisabledGeoLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<GeoRecord, GeoError> {
        Ok(GeoRecord::default())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Looks addresses up against a JSON HTTP API.
///
/// The URL template contains `{ip}`, e.g. `https://geoip.fortnic.com/{ip}?format=json`.
pub struct HttpGeoLocator {
    url_template: String,
    client: Client,
    cache: Cache<IpAddr, GeoRecord>,
}

impl HttpGeoLocator {
    pub fn new(url_template: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("shorturl-geo/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEO_CACHE_TTL_SECS))
            .max_capacity(GEO_CACHE_MAX_CAPACITY)
            .build();

        Ok(Self {
            url_template: url_template.to_string(),
            client,
            cache,
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.url_template.replace("{ip}", &ip.to_string())
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoRecord, GeoError> {
        let url = self.url_for(ip);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_geo_body(&body)
    }
}

/// Decode a provider body. Anything that is not a JSON object is malformed.
pub fn parse_geo_body(body: &[u8]) -> Result<GeoRecord, GeoError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| GeoError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(GeoError::Malformed("expected a JSON object".to_string()));
    }
    if value.get("status").and_then(|s| s.as_str()) == Some("fail") {
        return Err(GeoError::NotFound);
    }

    serde_json::from_value(value).map_err(|e| GeoError::Malformed(e.to_string()))
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoRecord, GeoError> {
        if let Some(hit) = self.cache.get(&ip).await {
            return Ok(hit);
        }

        let record = self.fetch(ip).await?;
        self.cache.insert(ip, record.clone()).await;
        Ok(record)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Build the locator selected by configuration.
///
/// A MaxMind database that fails to open falls back to the HTTP provider.
pub fn build_geo_locator(config: &AnalyticsConfig) -> anyhow::Result<Arc<dyn GeoLocator>> {
    if !config.enabled {
        return Ok(Arc::new(DisabledGeoLocator));
    }

    let locator: Arc<dyn GeoLocator> = match config.geo_provider {
        GeoProvider::None => Arc::new(DisabledGeoLocator),
        GeoProvider::Http => Arc::new(HttpGeoLocator::new(
            &config.geoip_api_url,
            config.geoip_timeout(),
        )?),
        GeoProvider::Maxmind => match MaxMindGeoLocator::new(
            config.geoip_city_db_path.as_deref(),
            config.geoip_asn_db_path.as_deref(),
        ) {
            Ok(locator) => Arc::new(locator),
            Err(e) => {
                warn!("Failed to open MaxMind databases: {e:#}, falling back to HTTP lookups");
                Arc::new(HttpGeoLocator::new(
                    &config.geoip_api_url,
                    config.geoip_timeout(),
                )?)
            }
        },
    };

    info!("Geolocation provider: {}", locator.name());
    debug!(timeout_ms = config.geoip_timeout_ms, "Geolocation lookups are bounded");
    Ok(locator)
}
