//! API route definitions

mod data;
mod health;
pub mod ws;

use axum::Router;
use crate::AppState;

/// Create all HTTP routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(data::routes())
        .merge(health::routes())
}

/// Create WebSocket routes (separate from API)
pub fn ws_routes() -> Router<AppState> {
    ws::routes()
}
