//! Core types for the live trade relay
//!
//! This crate defines the shared data structures used across the relay:
//! tradable currency pairs, client identities, trade and OHLC payloads,
//! and the client-facing WebSocket protocol.

pub mod client;
pub mod error;
pub mod pair;
pub mod trade;
pub mod websocket;

pub use client::ClientId;
pub use error::{RelayError, RelayResult};
pub use pair::CurrencyPair;
pub use trade::{EnrichedTrade, OhlcBar, TradeEvent};
pub use websocket::{ClientMessage, ConnectionState, PairSelection, ServerMessage};
