//! Geolocation from local MaxMind GeoLite2/GeoIP2 MMDB files
//!
//! Memory-mapped readers are shared across lookups; a lookup never leaves
//! the process, so it is an alternative to the HTTP provider when outbound
//! calls are undesirable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::analytics::geo::{GeoError, GeoLocator};
use crate::analytics::models::GeoRecord;

/// Locator backed by optional City and ASN databases
#[derive(Clone)]
pub struct MaxMindGeoLocator {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

impl MaxMindGeoLocator {
    /// Open the City and/or ASN databases
    ///
    /// # Arguments
    /// * `city_path` - Optional path to a GeoLite2-City or GeoIP2-City .mmdb file
    /// * `asn_path` - Optional path to a GeoLite2-ASN .mmdb file
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        let asn_reader = if let Some(path) = asn_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP ASN database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self {
            city_reader,
            asn_reader,
        })
    }

    fn lookup(&self, ip: IpAddr) -> GeoRecord {
        let mut record = GeoRecord {
            ip: Some(ip.to_string()),
            ..Default::default()
        };

        if let Some(ref reader) = self.city_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                    extract_from_city(&city, &mut record);
                } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                    // Country-only databases decode as a subset of City
                    extract_from_country(&country, &mut record);
                }
            }
        }

        if let Some(ref reader) = self.asn_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(asn)) = result.decode::<geoip2::Asn>() {
                    record.organization =
                        asn.autonomous_system_organization.map(|s| s.to_string());
                }
            }
        }

        record
    }
}

fn extract_from_city(city: &geoip2::City, record: &mut GeoRecord) {
    record.country_code = city.country.iso_code.map(|s| s.to_string());
    record.country = city.country.names.english.map(|s| s.to_string());

    if let Some(subdivision) = city.subdivisions.first() {
        record.region = subdivision.names.english.map(|s| s.to_string());
    }

    record.city = city.city.names.english.map(|s| s.to_string());
}

fn extract_from_country(country: &geoip2::Country, record: &mut GeoRecord) {
    record.country_code = country.country.iso_code.map(|s| s.to_string());
    record.country = country.country.names.english.map(|s| s.to_string());
}

#[async_trait]
impl GeoLocator for MaxMindGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoRecord, GeoError> {
        let record = self.lookup(ip);
        if record.is_empty() {
            return Err(GeoError::NotFound);
        }
        Ok(record)
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}
