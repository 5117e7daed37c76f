//! Click analytics
//!
//! Visitor address extraction, best-effort geolocation, the off-path click
//! recorder, and the row types behind the reporting views.

pub mod geo;
pub mod ip_extractor;
pub mod maxmind;
pub mod models;
pub mod recorder;
pub mod report;

pub use geo::{build_geo_locator, DisabledGeoLocator, GeoError, GeoLocator, HttpGeoLocator};
pub use ip_extractor::extract_client_ip;
pub use maxmind::MaxMindGeoLocator;
pub use models::{ClickEvent, GeoRecord, Visit};
pub use recorder::{ClickRecorder, RecorderSettings};
pub use report::{DetailedRow, ReportFilter, ReportKind, SummaryRow};
