use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::dto::{GenerateRequest, ReportRequest, ReportResponse, StatusMessage};
use super::error::{ApiError, ApiResult};
use crate::allocator::{Allocator, ClaimMode, ClaimOutcome, ClaimRequest};
use crate::analytics::{ReportFilter, ReportKind};
use crate::auth::AuthService;
use crate::storage::{with_timeout, Storage, StorageError};

pub struct AppState {
    pub allocator: Arc<Allocator>,
    pub auth: Arc<AuthService>,
    pub storage: Arc<dyn Storage>,
    pub store_timeout: std::time::Duration,
}

/// Allocate short URLs
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) =
        payload.map_err(|_| ApiError::BadRequest("Invalid JSON payload".to_string()))?;

    if !req.has_required_fields() {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }

    let principal = state
        .auth
        .authenticate(req.apikey.as_deref().unwrap_or_default())
        .ok_or(ApiError::Unauthorized)?;

    let mode: ClaimMode = req.claim_type.as_deref().unwrap_or_default().parse()?;

    let count = req
        .count
        .as_ref()
        .and_then(|n| n.to_u32())
        .ok_or_else(|| ApiError::BadRequest("Count must be a valid number".to_string()))?;
    let expiry_days = req
        .expiry
        .as_ref()
        .and_then(|n| n.to_u32())
        .ok_or_else(|| ApiError::BadRequest("Expiry Time must be a valid number".to_string()))?;

    let owner = principal
        .owner()
        .unwrap_or(&state.allocator.config().default_created_by)
        .to_string();

    let request = ClaimRequest {
        mode,
        count,
        custom_code: req.shortcode.map(|c| c.trim().to_string()),
        destination: req.main_url.unwrap_or_default(),
        owner,
        campaign: req.campaign_name.unwrap_or_default().trim().to_string(),
        sender_id: req.sender_id.unwrap_or_default(),
        domain: req.domain,
        expiry_days,
    };

    match state.allocator.claim(request).await? {
        ClaimOutcome::Allocated(urls) => Ok(Json(urls).into_response()),
        ClaimOutcome::EmptyPool => Ok(Json(StatusMessage {
            message: "No available shortcodes",
            status: "empty",
        })
        .into_response()),
    }
}

/// Summary or detailed click report
pub async fn report(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) =
        payload.map_err(|_| ApiError::BadRequest("Invalid JSON payload".to_string()))?;

    let kind: ReportKind = req
        .report_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| {
            ApiError::BadRequest("reportType must be 'summary' or 'detailed'".to_string())
        })?;

    let filter = ReportFilter::new(req.campaign_name, req.shortcode);
    let storage = &state.storage;

    let response = match kind {
        ReportKind::Summary => {
            let rows = with_timeout(state.store_timeout, async {
                storage.summary_report(&filter).await.map_err(StorageError::from)
            })
            .await
            .map_err(report_failed)?;
            info!(rows = rows.len(), "Summary report served");
            report_body(rows)
        }
        ReportKind::Detailed => {
            let rows = with_timeout(state.store_timeout, async {
                storage.detailed_report(&filter).await.map_err(StorageError::from)
            })
            .await
            .map_err(report_failed)?;
            info!(rows = rows.len(), "Detailed report served");
            report_body(rows)
        }
    };

    Ok(response)
}

fn report_body<T: Serialize>(reports: Vec<T>) -> Response {
    Json(ReportResponse {
        status: "success",
        reports,
    })
    .into_response()
}

fn report_failed(err: StorageError) -> ApiError {
    error!(error = %err, "Failed to build report");
    ApiError::Internal("Failed to fetch report".to_string())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
