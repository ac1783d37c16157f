//! Live Trade Relay API Server
//!
//! Relays Bitstamp live trades to WebSocket clients, enriched with a
//! trailing one-minute OHLC bar.

mod config;
mod error;
mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use ticker_bitstamp::BitstampWebSocket;
use ticker_core::ConnectionState;
use ticker_services::{
    feed_events, ClientRegistry, FeedAdapter, Gateway, RateLimiter, SubscriptionRegistry,
    TimeSeriesStore, UpstreamLink,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Upstream session state, for health reporting
    pub upstream_state: watch::Receiver<ConnectionState>,
    pub http: reqwest::Client,
    pub data_source_url: String,
    pub trust_forwarded_for: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ticker_api=debug")),
        )
        .init();

    info!("Starting Live Trade Relay");

    let config = AppConfig::from_env()?;

    // Upstream session (connects in the background)
    let (mut bitstamp, bitstamp_updates) = BitstampWebSocket::new(config.bitstamp.clone());
    bitstamp.start();
    let upstream_state = bitstamp.watch_state();
    let bitstamp = Arc::new(bitstamp);

    // Storage and registries
    let store = Arc::new(TimeSeriesStore::new());
    let (events_tx, events_rx) = feed_events();
    let link = UpstreamLink::new(bitstamp.clone(), events_tx.clone());
    let registry = Arc::new(SubscriptionRegistry::new(link, Arc::clone(&store)));

    // Feed pipeline: upstream trades -> store -> OHLC -> gateway
    let adapter = FeedAdapter::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        config.feed.clone(),
        events_tx,
    );
    tokio::spawn(adapter.run(bitstamp_updates));

    let clients = Arc::new(ClientRegistry::new(config.gateway.id_attempts));
    let gateway = Arc::new(Gateway::new(clients, registry, config.gateway.clone()));
    tokio::spawn(Arc::clone(&gateway).run_events(events_rx));

    let state = AppState {
        gateway,
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limiter.clone())),
        upstream_state,
        http: reqwest::Client::new(),
        data_source_url: config.data_source_url.clone(),
        trust_forwarded_for: config.trust_forwarded_for,
    };

    // Configure CORS for browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // Build router
    let app = Router::new()
        .merge(routes::api_routes())
        .merge(routes::ws_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
impl AppState {
    /// State wired to an upstream session that is never started
    pub fn detached(data_source_url: String) -> Self {
        use ticker_bitstamp::BitstampWebSocketConfig;

        let (bitstamp, _) = BitstampWebSocket::new(BitstampWebSocketConfig::default());
        let upstream_state = bitstamp.watch_state();
        let (events_tx, _) = feed_events();
        let store = Arc::new(TimeSeriesStore::new());
        let link = UpstreamLink::new(Arc::new(bitstamp), events_tx);
        let registry = Arc::new(SubscriptionRegistry::new(link, store));
        let gateway = Gateway::new(
            Arc::new(ClientRegistry::default()),
            registry,
            ticker_services::GatewayConfig::default(),
        );

        Self {
            gateway: Arc::new(gateway),
            rate_limiter: Arc::new(RateLimiter::default()),
            upstream_state,
            http: reqwest::Client::new(),
            data_source_url,
            trust_forwarded_for: false,
        }
    }
}
