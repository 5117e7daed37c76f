use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, header::HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::resolver::{Redirector, ResolveError};
use crate::analytics::extract_client_ip;
use crate::analytics::ip_extractor::anonymize_ip;
use crate::config::AnalyticsConfig;

pub struct RedirectState {
    pub redirector: Arc<Redirector>,
    pub analytics_config: AnalyticsConfig,
}

/// The code is the last non-empty segment, so `/shorturl/ACME/abc` resolves `abc`
pub fn code_from_path(path: &str) -> Option<&str> {
    path.split('/').rev().find(|segment| !segment.is_empty())
}

/// Redirect to the destination of an active binding
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(path): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match code_from_path(&path) {
        Some(code) => redirect_code(&state, code, addr, &headers).await,
        None => invalid_short_url().await.into_response(),
    }
}

/// GET on a path that also serves an API endpoint, such as `/shorturl/generate`
pub async fn redirect_static_path(
    State(state): State<Arc<RedirectState>>,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match code_from_path(uri.path()) {
        Some(code) => redirect_code(&state, code, addr, &headers).await,
        None => invalid_short_url().await.into_response(),
    }
}

async fn redirect_code(
    state: &RedirectState,
    code: &str,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Response {
    match state.redirector.resolve(code).await {
        Ok(binding) => {
            let config = &state.analytics_config;
            let mut client_ip = extract_client_ip(headers, addr.ip(), config);
            if config.ip_anonymization {
                client_ip = anonymize_ip(client_ip);
            }

            let device = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let response = Redirect::temporary(&binding.long_url).into_response();
            if !response.status().is_redirection() {
                // Destination cannot be carried in a Location header
                error!(short_code = %code, binding_id = binding.id, "Stored destination is not a valid redirect target");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
            }

            state.redirector.track(&binding, client_ip, device);
            response
        }
        Err(ResolveError::NotFound) => {
            debug!(short_code = %code, "No active binding");
            (StatusCode::NOT_FOUND, "Short URL not found or expired").into_response()
        }
        Err(ResolveError::Store(e)) => {
            error!(short_code = %code, error = %e, "Binding lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// `/shorturl/` with nothing after it
pub async fn invalid_short_url() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "Invalid short URL")
}
