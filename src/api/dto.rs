//! Request and response bodies

use serde::{Deserialize, Serialize};

/// A numeric field that callers send either as a JSON number or a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(i64),
    Text(String),
}

impl Numeric {
    pub fn is_blank(&self) -> bool {
        matches!(self, Numeric::Text(s) if s.trim().is_empty())
    }

    /// Non-negative whole numbers; zero is left for the range checks to reject
    pub fn to_u32(&self) -> Option<u32> {
        match self {
            Numeric::Number(n) => u32::try_from(*n).ok(),
            Numeric::Text(s) => s.trim().parse::<u32>().ok(),
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, rename = "campaignName", alias = "campignName")]
    pub campaign_name: Option<String>,
    #[serde(default, rename = "mainUrl")]
    pub main_url: Option<String>,
    #[serde(default)]
    pub apikey: Option<String>,
    #[serde(default, rename = "type")]
    pub claim_type: Option<String>,
    #[serde(default)]
    pub shortcode: Option<String>,
    /// Days until the bindings expire
    #[serde(default)]
    pub expiry: Option<Numeric>,
    #[serde(default)]
    pub count: Option<Numeric>,
    #[serde(default, rename = "senderId")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl GenerateRequest {
    pub fn has_required_fields(&self) -> bool {
        let numeric_present = |v: &Option<Numeric>| v.as_ref().is_some_and(|n| !n.is_blank());

        present(&self.campaign_name)
            && present(&self.main_url)
            && present(&self.apikey)
            && present(&self.claim_type)
            && numeric_present(&self.expiry)
            && numeric_present(&self.count)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportRequest {
    #[serde(default, rename = "campaignName", alias = "campignName")]
    pub campaign_name: Option<String>,
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default, rename = "reportType")]
    pub report_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse<T: Serialize> {
    pub status: &'static str,
    pub reports: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_from_string_or_number() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"count":"3","expiry":7}"#).unwrap();
        assert_eq!(req.count.unwrap().to_u32(), Some(3));
        assert_eq!(req.expiry.unwrap().to_u32(), Some(7));
    }

    #[test]
    fn test_numeric_rejects_junk() {
        assert_eq!(Numeric::Text("abc".to_string()).to_u32(), None);
        assert_eq!(Numeric::Text("-2".to_string()).to_u32(), None);
        assert_eq!(Numeric::Number(-2).to_u32(), None);
        assert_eq!(Numeric::Text(" 0 ".to_string()).to_u32(), Some(0));
    }

    #[test]
    fn test_legacy_campaign_spelling() {
        let req: GenerateRequest = serde_json::from_str(r#"{"campignName":"old"}"#).unwrap();
        assert_eq!(req.campaign_name.as_deref(), Some("old"));
    }

    #[test]
    fn test_required_fields() {
        let full: GenerateRequest = serde_json::from_str(
            r#"{"campaignName":"c","mainUrl":"https://e.com","apikey":"k","type":"unique","expiry":"1","count":"1"}"#,
        )
        .unwrap();
        assert!(full.has_required_fields());

        let blank_count: GenerateRequest = serde_json::from_str(
            r#"{"campaignName":"c","mainUrl":"https://e.com","apikey":"k","type":"unique","expiry":"1","count":""}"#,
        )
        .unwrap();
        assert!(!blank_count.has_required_fields());
        assert!(!GenerateRequest::default().has_required_fields());
    }
}
