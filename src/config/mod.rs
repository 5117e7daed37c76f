use anyhow::{bail, Context};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub allocation: AllocationConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    /// Upper bound for any single store call made on the request path
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    /// Require `X-API-Key` on the report endpoint
    #[serde(default)]
    pub protect_reports: bool,
}

/// An accepted API key and the owner tag recorded on bindings it creates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Base prepended to every short URL when the caller supplies no domain
    pub default_domain: String,
    pub default_created_by: String,
    pub custom_code_policy: CustomCodePolicy,
    pub max_claim_count: u32,
}

/// What to do when a custom code is already bound to an active destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomCodePolicy {
    /// Add another binding; the newest active binding wins at resolve time
    #[default]
    Allow,
    /// Refuse the claim while an active binding for the code exists
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached binding lookups (0 disables the cache)
    pub binding_ttl_secs: u64,
    pub max_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub geo_provider: GeoProvider,
    /// URL template for the HTTP provider, `{ip}` is replaced by the visitor address
    pub geoip_api_url: String,
    pub geoip_city_db_path: Option<String>,
    pub geoip_asn_db_path: Option<String>,
    pub geoip_timeout_ms: u64,
    pub ip_anonymization: bool,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
    pub click_queue_size: usize,
    pub click_max_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProvider {
    Http,
    Maxmind,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Trust only the socket address
    None,
    /// Parse Forwarded / X-Forwarded-For against the trusted proxy list
    Standard,
    /// Trust CF-Connecting-IP
    Cloudflare,
}

impl CustomCodePolicy {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value.to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => bail!("Unknown CUSTOM_CODE_POLICY '{other}'. Supported values: allow, reject"),
        }
    }
}

impl Config {
    pub const DEFAULT_GEOIP_API_URL: &'static str = "https://geoip.fortnic.com/{ip}?format=json";

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(default)
        };

        let backend = match var("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };
        let database_url = var("DATABASE_URL", "sqlite://./shorturl.db?mode=rwc");
        let max_connections = parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;

        let host = var("SERVER_HOST", "0.0.0.0");
        let port = parse_var(&lookup, "SERVER_PORT", 8080u16)?;

        let auth_enabled = !flag("DISABLE_AUTH", false);
        let api_keys = lookup("API_KEYS")
            .map(|raw| parse_api_keys(&raw))
            .unwrap_or_default();
        if auth_enabled && api_keys.is_empty() {
            tracing::warn!("API_KEYS is empty; every generate request will be rejected");
        }

        let default_domain = var("DEFAULT_DOMAIN", "http://localhost:8080/shorturl/");
        let default_created_by = var("DEFAULT_CREATED_BY", "system");
        let custom_code_policy = CustomCodePolicy::parse(&var("CUSTOM_CODE_POLICY", "allow"))?;
        let max_claim_count = parse_var(&lookup, "MAX_CLAIM_COUNT", 1000u32)?;

        let store_timeout_ms = parse_var(&lookup, "STORE_TIMEOUT_MS", 5000u64)?;
        let binding_ttl_secs = parse_var(&lookup, "BINDING_CACHE_TTL_SECS", 30u64)?;
        let max_entries = parse_var(&lookup, "BINDING_CACHE_MAX_ENTRIES", 10_000u64)?;

        let geo_provider = match var("GEOIP_PROVIDER", "http").to_lowercase().as_str() {
            "http" | "api" => GeoProvider::Http,
            "maxmind" | "mmdb" => GeoProvider::Maxmind,
            "none" | "off" => GeoProvider::None,
            other => {
                tracing::warn!(
                    "Unknown GEOIP_PROVIDER '{other}', falling back to 'none'. Supported values: http, maxmind, none"
                );
                GeoProvider::None
            }
        };

        let trusted_proxy_mode = match var("TRUSTED_PROXY_MODE", "none").to_lowercase().as_str() {
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "none" => TrustedProxyMode::None,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = match lookup("TRUSTED_PROXIES") {
            Some(raw) => parse_trusted_proxies(&raw)?,
            None => Vec::new(),
        };
        let num_trusted_proxies = lookup("NUM_TRUSTED_PROXIES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            auth: AuthConfig {
                enabled: auth_enabled,
                api_keys,
                protect_reports: flag("REPORT_REQUIRE_API_KEY", false),
            },
            allocation: AllocationConfig {
                default_domain,
                default_created_by,
                custom_code_policy,
                max_claim_count,
            },
            cache: CacheConfig {
                binding_ttl_secs,
                max_entries,
            },
            analytics: AnalyticsConfig {
                enabled: flag("ANALYTICS_ENABLED", true),
                geo_provider,
                geoip_api_url: var("GEOIP_API_URL", Self::DEFAULT_GEOIP_API_URL),
                geoip_city_db_path: lookup("GEOIP_CITY_DB"),
                geoip_asn_db_path: lookup("GEOIP_ASN_DB"),
                geoip_timeout_ms: parse_var(&lookup, "GEOIP_TIMEOUT_MS", 1500u64)?,
                ip_anonymization: flag("IP_ANONYMIZATION", false),
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
                click_queue_size: parse_var(&lookup, "CLICK_QUEUE_SIZE", 10_000usize)?,
                click_max_in_flight: parse_var(&lookup, "CLICK_MAX_IN_FLIGHT", 64usize)?,
            },
            store_timeout_ms,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl AnalyticsConfig {
    pub fn geoip_timeout(&self) -> Duration {
        Duration::from_millis(self.geoip_timeout_ms)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geo_provider: GeoProvider::None,
            geoip_api_url: Config::DEFAULT_GEOIP_API_URL.to_string(),
            geoip_city_db_path: None,
            geoip_asn_db_path: None,
            geoip_timeout_ms: 1500,
            ip_anonymization: false,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
            click_queue_size: 10_000,
            click_max_in_flight: 64,
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_domain: "http://localhost:8080/shorturl/".to_string(),
            default_created_by: "system".to_string(),
            custom_code_policy: CustomCodePolicy::Allow,
            max_claim_count: 1000,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

/// Parse `key[:owner],key[:owner],...`
fn parse_api_keys(raw: &str) -> Vec<ApiKeyConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((key, owner)) if !owner.trim().is_empty() => ApiKeyConfig {
                key: key.trim().to_string(),
                owner: Some(owner.trim().to_string()),
            },
            Some((key, _)) => ApiKeyConfig {
                key: key.trim().to_string(),
                owner: None,
            },
            None => ApiKeyConfig {
                key: entry.to_string(),
                owner: None,
            },
        })
        .collect()
}

/// Parse a comma separated list of CIDRs; bare addresses are treated as host routes
fn parse_trusted_proxies(raw: &str) -> anyhow::Result<Vec<IpNet>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .with_context(|| format!("TRUSTED_PROXIES entry '{entry}' is not an IP or CIDR"))
        })
        .collect()
}
