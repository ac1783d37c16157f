//! Server configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use ticker_bitstamp::BitstampWebSocketConfig;
use ticker_services::{FeedConfig, GatewayConfig, RateLimiterConfig};
use url::Url;

/// Default upstream for `GET /data`
pub const DEFAULT_DATA_SOURCE_URL: &str =
    "https://hacker-news.firebaseio.com/v0/topstories.json?print=pretty";

const DEFAULT_SERVER_PORT: u16 = 3000;

/// Full server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub bitstamp: BitstampWebSocketConfig,
    pub feed: FeedConfig,
    pub gateway: GatewayConfig,
    pub rate_limiter: RateLimiterConfig,
    pub data_source_url: String,
    /// Key rate limits on the first `x-forwarded-for` hop instead of the
    /// socket peer. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            bitstamp: BitstampWebSocketConfig::default(),
            feed: FeedConfig::default(),
            gateway: GatewayConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            data_source_url: DEFAULT_DATA_SOURCE_URL.to_string(),
            trust_forwarded_for: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    ///
    /// Unset variables keep their defaults:
    /// - SERVER_PORT
    /// - BITSTAMP_WS_URL
    /// - OHLC_WINDOW_SECS, SERIES_TTL_SECS
    /// - MAX_PAIRS_PER_CLIENT
    /// - RATE_LIMIT_IP_PER_WINDOW, RATE_LIMIT_USER_PER_WINDOW, RATE_LIMIT_WINDOW_SECS
    /// - DATA_SOURCE_URL
    /// - TRUST_FORWARDED_FOR
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.server_port = parse_var(&lookup, "SERVER_PORT", config.server_port)?;

        if let Some(url) = lookup("BITSTAMP_WS_URL") {
            config.bitstamp.url = validate_url("BITSTAMP_WS_URL", &url)?;
        }

        config.feed.ohlc_window_secs =
            parse_var(&lookup, "OHLC_WINDOW_SECS", config.feed.ohlc_window_secs)?;
        config.feed.series_ttl = Duration::from_secs(parse_var(
            &lookup,
            "SERIES_TTL_SECS",
            config.feed.series_ttl.as_secs(),
        )?);

        config.gateway.max_pairs_per_client = parse_var(
            &lookup,
            "MAX_PAIRS_PER_CLIENT",
            config.gateway.max_pairs_per_client,
        )?;

        config.rate_limiter.ip_limit =
            parse_var(&lookup, "RATE_LIMIT_IP_PER_WINDOW", config.rate_limiter.ip_limit)?;
        config.rate_limiter.user_limit = parse_var(
            &lookup,
            "RATE_LIMIT_USER_PER_WINDOW",
            config.rate_limiter.user_limit,
        )?;
        config.rate_limiter.window = Duration::from_secs(parse_var(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            config.rate_limiter.window.as_secs(),
        )?);

        if let Some(url) = lookup("DATA_SOURCE_URL") {
            config.data_source_url = validate_url("DATA_SOURCE_URL", &url)?;
        }

        config.trust_forwarded_for =
            parse_var(&lookup, "TRUST_FORWARDED_FOR", config.trust_forwarded_for)?;

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    field: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(field) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber {
                field: field.to_string(),
                value,
            }),
        None => Ok(default),
    }
}

fn validate_url(field: &str, value: &str) -> Result<String, ConfigError> {
    Url::parse(value)
        .map(|_| value.to_string())
        .map_err(|e| ConfigError::InvalidUrl {
            field: field.to_string(),
            error: e.to_string(),
        })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid number in {field}: {value:?}")]
    InvalidNumber { field: String, value: String },

    #[error("Invalid URL in {field}: {error}")]
    InvalidUrl { field: String, error: String },
}
