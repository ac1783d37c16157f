//! WebSocket message types for the streaming endpoint
//!
//! Frames in both directions use an `{ "event": ..., "data": ... }` envelope.

use serde::{Deserialize, Serialize};

use crate::{CurrencyPair, EnrichedTrade};

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add pairs to the client's subscription set
    Subscribe(PairSelection),
    /// Remove pairs from the client's subscription set
    Unsubscribe(PairSelection),
}

/// Body of a subscribe/unsubscribe command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSelection {
    #[serde(default)]
    pub currency_pairs: Vec<CurrencyPair>,
}

impl PairSelection {
    pub fn new(currency_pairs: impl IntoIterator<Item = CurrencyPair>) -> Self {
        Self {
            currency_pairs: currency_pairs.into_iter().collect(),
        }
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A trade on a subscribed pair
    Trade(EnrichedTrade),
    /// A request-scoped failure
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Connection state of the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Connected and receiving data
    Connected,
    /// Attempting to connect
    Connecting,
    /// Disconnected, may reconnect
    Disconnected,
    /// Connection failed, not retrying
    Failed,
}
