//! `GET /data`: numbers from the configured source, filtered by divisibility

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::request::Parts,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::ApiError;
use crate::AppState;

/// Response for `GET /data`
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub result: Vec<i64>,
}

/// Client address used as the per-IP rate limit key
///
/// The socket peer, unless the server is configured to trust the first
/// `x-forwarded-for` hop set by a fronting proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());

            if let Some(ip) = forwarded {
                return Ok(ClientIp(ip.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(ClientIp(peer.unwrap_or_else(|| "unknown".to_string())))
    }
}

/// Create data routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/data", get(get_data))
}

async fn get_data(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DataResponse>, ApiError> {
    let user = params.get("user").map(String::as_str).unwrap_or_default();

    let decision = state.rate_limiter.check(&ip, user);
    if !decision.is_allowed() {
        return Err(ApiError::RateLimited(decision.counts()));
    }

    let divisor: i64 = user
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("user must be an integer".to_string()))?;
    if divisor == 0 {
        return Err(ApiError::BadRequest("user must not be zero".to_string()));
    }

    let numbers = fetch_numbers(&state).await?;
    let result = divisible_by(numbers, divisor);
    debug!("GET /data user={} -> {} results", divisor, result.len());

    Ok(Json(DataResponse { result }))
}

async fn fetch_numbers(state: &AppState) -> Result<Vec<i64>, ApiError> {
    let response = state
        .http
        .get(state.data_source_url.as_str())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| {
            error!("Data source request failed: {}", e);
            ApiError::DataSource(e.to_string())
        })?;

    response.json::<Vec<i64>>().await.map_err(|e| {
        error!("Data source returned an unexpected body: {}", e);
        ApiError::DataSource(e.to_string())
    })
}

fn divisible_by(numbers: Vec<i64>, divisor: i64) -> Vec<i64> {
    numbers.into_iter().filter(|n| n % divisor == 0).collect()
}
