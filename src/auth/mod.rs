use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::config::{ApiKeyConfig, AuthConfig};

/// Who a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Authentication is off
    Anonymous,
    /// A configured key, with the owner tag it maps to (if any)
    Key { owner: Option<String> },
}

impl Principal {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Principal::Key { owner } => owner.as_deref(),
            Principal::Anonymous => None,
        }
    }
}

pub struct AuthService {
    enabled: bool,
    protect_reports: bool,
    api_keys: Arc<Vec<ApiKeyConfig>>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            enabled: config.enabled,
            protect_reports: config.protect_reports,
            api_keys: Arc::new(config.api_keys.clone()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reports need a key only when opted in and auth is on
    pub fn reports_protected(&self) -> bool {
        self.enabled && self.protect_reports
    }

    /// `None` means the key is rejected
    pub fn authenticate(&self, key: &str) -> Option<Principal> {
        // If authentication is disabled, allow all requests
        if !self.enabled {
            return Some(Principal::Anonymous);
        }

        // Compare against every key so timing does not reveal which one matched
        let mut matched: Option<&ApiKeyConfig> = None;
        for candidate in self.api_keys.iter() {
            if bool::from(candidate.key.as_bytes().ct_eq(key.as_bytes())) {
                matched = Some(candidate);
            }
        }

        matched.map(|k| Principal::Key {
            owner: k.owner.clone(),
        })
    }
}

/// Guard for routes that take their key from the `X-API-Key` header
pub async fn require_api_key(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    match auth_service.authenticate(api_key) {
        Some(_) => next.run(request).await,
        None => ApiError::Unauthorized.into_response(),
    }
}
