//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use ticker_services::RateCounts;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Rate limit reached; carries the counts that tripped it
    #[error("Too many requests")]
    RateLimited(RateCounts),

    #[error("{0}")]
    BadRequest(String),

    #[error("Data source request failed: {0}")]
    DataSource(String),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited(counts) => {
                (StatusCode::TOO_MANY_REQUESTS, Json(counts)).into_response()
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::DataSource(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: self.to_string(),
                }),
            )
                .into_response(),
        }
    }
}
