//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use ticker_core::{ConnectionState, CurrencyPair};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    upstream: ConnectionState,
    clients: usize,
    active_pairs: Vec<CurrencyPair>,
}

/// Health check handler
///
/// Degraded whenever the upstream session is not connected.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let upstream = *state.upstream_state.borrow();
    let stats = state.gateway.stats();

    let (code, status) = match upstream {
        ConnectionState::Connected => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    let response = HealthResponse {
        status,
        upstream,
        clients: stats.clients,
        active_pairs: stats.active_pairs,
    };

    (code, Json(response))
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}
