//! Bitstamp integration for the trade relay
//!
//! This crate owns the single upstream connection to Bitstamp's public
//! WebSocket API. It sends `bts:subscribe`/`bts:unsubscribe` control frames
//! for `live_trades_<pair>` channels and turns incoming `trade` events into
//! [`BitstampUpdate`]s.

pub mod error;
pub mod types;
pub mod websocket;

pub use error::BitstampError;
pub use types::{BitstampCommand, FeedMessage, TradeData};
pub use websocket::{BitstampUpdate, BitstampWebSocket, BitstampWebSocketConfig};
