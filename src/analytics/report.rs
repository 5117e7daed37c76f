//! Read views over the click ledger

use serde::{Serialize, Serializer};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Total clicks per code and campaign
    Summary,
    /// One row per click
    Detailed,
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(ReportKind::Summary),
            "detailed" => Ok(ReportKind::Detailed),
            other => Err(format!("unknown report type {other:?}")),
        }
    }
}

/// Optional case-insensitive substring filters
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub campaign_name: Option<String>,
    pub code: Option<String>,
}

impl ReportFilter {
    pub fn new(campaign_name: Option<String>, code: Option<String>) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            campaign_name: non_empty(campaign_name),
            code: non_empty(code),
        }
    }

    pub fn campaign_pattern(&self) -> Option<String> {
        self.campaign_name.as_deref().map(like_pattern)
    }

    pub fn code_pattern(&self) -> Option<String> {
        self.code.as_deref().map(like_pattern)
    }
}

/// `%needle%` with LIKE wildcards escaped by backslash
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Total clicks per code and campaign
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SummaryRow {
    pub shortcode: String,
    #[serde(rename = "campaignName")]
    pub campaign_name: String,
    pub clicks: i64,
}

/// One ledger row joined with the campaign of the binding it resolved to
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DetailedRow {
    pub shortcode: String,
    #[serde(rename = "campaignName")]
    pub campaign_name: String,
    pub clicks: i64,
    pub ip: String,
    pub device: String,
    pub country_code: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub organization: String,
    pub timezone: String,
    #[serde(rename = "time", serialize_with = "serialize_timestamp")]
    pub recorded_at: i64,
}

fn serialize_timestamp<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = chrono::DateTime::from_timestamp(*ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    serializer.serialize_str(&formatted)
}
