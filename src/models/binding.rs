use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A code bound to its destination.
///
/// Expiry is never written back: whether a binding is live is computed from
/// `expires_at` at read time. `disabled` is only flipped by operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Binding {
    pub id: i64,
    pub long_url: String,
    pub code: String,
    pub expires_at: i64,
    pub domain: String,
    pub sender_id: String,
    pub created_by: String,
    pub campaign_name: String,
    pub disabled: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    Active,
    Expired,
    Disabled,
}

impl Binding {
    pub fn status_at(&self, now: i64) -> BindingStatus {
        if self.disabled {
            BindingStatus::Disabled
        } else if now >= self.expires_at {
            BindingStatus::Expired
        } else {
            BindingStatus::Active
        }
    }

    pub fn is_active_at(&self, now: i64) -> bool {
        self.status_at(now) == BindingStatus::Active
    }

    pub fn short_url(&self) -> String {
        build_short_url(&self.domain, &self.sender_id, &self.code)
    }
}

/// Values for a binding that has not been written yet
#[derive(Debug, Clone)]
pub struct NewBinding {
    pub long_url: String,
    pub code: String,
    pub expires_at: i64,
    pub domain: String,
    pub sender_id: String,
    pub created_by: String,
    pub campaign_name: String,
}

/// `domain + sender/ + code`, the sender segment only when one is set
pub fn build_short_url(domain: &str, sender_id: &str, code: &str) -> String {
    if sender_id.is_empty() {
        format!("{domain}{code}")
    } else {
        format!("{domain}{sender_id}/{code}")
    }
}
