//! Data models for click analytics

use serde::{Deserialize, Serialize};

/// Geographic information for a visitor address.
///
/// Every field is optional: providers fill in what they know and the ledger
/// stores missing values as empty strings / zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    #[serde(default)]
    pub ip: Option<String>,

    /// ISO country code (e.g., "US", "IN")
    #[serde(default)]
    pub country_code: Option<String>,

    #[serde(default)]
    pub country: Option<String>,

    /// Region/state/province
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub postal_code: Option<String>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    /// ISP / ASN organization name
    #[serde(default, alias = "org")]
    pub organization: Option<String>,

    #[serde(default)]
    pub timezone: Option<String>,
}

impl GeoRecord {
    pub fn is_empty(&self) -> bool {
        self.country_code.is_none()
            && self.country.is_none()
            && self.region.is_none()
            && self.city.is_none()
            && self.postal_code.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.organization.is_none()
            && self.timezone.is_none()
    }
}

/// A redirect that still has to be enriched and written to the ledger
#[derive(Debug, Clone)]
pub struct Visit {
    pub binding_id: i64,
    pub code: String,
    pub client_ip: std::net::IpAddr,
    /// Raw User-Agent header
    pub device: String,
    /// Unix timestamp of the redirect
    pub visited_at: i64,
}

/// One ledger row. Append-only: the core never updates or deletes these.
#[derive(Debug, Clone)]
pub struct ClickEvent {
    pub binding_id: i64,
    pub code: String,
    pub clicks: i64,
    pub ip: String,
    pub device: String,
    pub geo: GeoRecord,
    pub recorded_at: i64,
}

impl ClickEvent {
    pub fn from_visit(visit: Visit, geo: GeoRecord) -> Self {
        Self {
            binding_id: visit.binding_id,
            code: visit.code,
            clicks: 1,
            ip: visit.client_ip.to_string(),
            device: visit.device,
            geo,
            recorded_at: visit.visited_at,
        }
    }
}
