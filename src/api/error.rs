//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::allocator::AllocationError;

/// Shown instead of any store failure detail
pub const GENERATE_FAILED: &str = "Failed to generate short URLs";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub status: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            message: self.to_string(),
            status: "error",
        };

        (status, Json(body)).into_response()
    }
}

impl From<AllocationError> for ApiError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Validation(message) => ApiError::BadRequest(message),
            other => {
                error!(error = %other, "Allocation failed");
                ApiError::Internal(GENERATE_FAILED.to_string())
            }
        }
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;
