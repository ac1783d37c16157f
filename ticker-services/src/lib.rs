//! Services for the live trade relay
//!
//! This crate holds the stateful core of the relay: the time-series store
//! and OHLC aggregation, the client and subscription registries, the feed
//! pipeline fed by the upstream session, the streaming gateway and the
//! HTTP rate limiter.

pub mod client_registry;
pub mod feed;
pub mod gateway;
pub mod ohlc;
pub mod rate_limiter;
pub mod subscription;
pub mod time_series;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use client_registry::{ClientChannel, ClientRegistry};
pub use feed::{
    feed_events, FeedAdapter, FeedConfig, FeedEvent, FeedEventReceiver, FeedEventSender,
    UpstreamLink,
};
pub use gateway::{Gateway, GatewayConfig, GatewayStats};
pub use ohlc::compute_ohlc;
pub use rate_limiter::{RateCounts, RateDecision, RateLimiter, RateLimiterConfig};
pub use subscription::SubscriptionRegistry;
pub use time_series::TimeSeriesStore;
pub use upstream::UpstreamFeed;
