//! Bitstamp WebSocket message types

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use ticker_core::{CurrencyPair, TradeEvent};

use crate::BitstampError;

pub const EVENT_SUBSCRIBE: &str = "bts:subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "bts:unsubscribe";
pub const EVENT_TRADE: &str = "trade";
pub const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "bts:subscription_succeeded";
pub const EVENT_UNSUBSCRIPTION_SUCCEEDED: &str = "bts:unsubscription_succeeded";
pub const EVENT_REQUEST_RECONNECT: &str = "bts:request_reconnect";
pub const EVENT_ERROR: &str = "bts:error";

// ============================================================================
// Outgoing
// ============================================================================

/// Control frame sent to Bitstamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitstampCommand {
    pub event: &'static str,
    pub data: ChannelParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelParams {
    pub channel: String,
}

impl BitstampCommand {
    pub fn subscribe(pair: CurrencyPair) -> Self {
        Self {
            event: EVENT_SUBSCRIBE,
            data: ChannelParams {
                channel: pair.live_trades_channel(),
            },
        }
    }

    pub fn unsubscribe(pair: CurrencyPair) -> Self {
        Self {
            event: EVENT_UNSUBSCRIBE,
            data: ChannelParams {
                channel: pair.live_trades_channel(),
            },
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Raw envelope of every frame Bitstamp sends
#[derive(Debug, Clone, Deserialize)]
pub struct BitstampEnvelope {
    pub event: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `trade` event on a `live_trades_<pair>` channel
#[derive(Debug, Clone, Deserialize)]
pub struct TradeData {
    #[serde(deserialize_with = "deserialize_unix_seconds")]
    pub timestamp: i64,
    pub price: Decimal,
}

impl From<&TradeData> for TradeEvent {
    fn from(data: &TradeData) -> Self {
        TradeEvent::new(data.timestamp, data.price)
    }
}

/// Bitstamp sends timestamps as decimal strings; accept plain numbers too
fn deserialize_unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Int(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Int(ts) => Ok(ts),
        RawTimestamp::Text(text) => text.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}

/// Normalized view of an incoming frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A trade on a supported pair
    Trade { pair: CurrencyPair, trade: TradeEvent },
    /// Bitstamp confirmed a channel subscription
    SubscriptionSucceeded { channel: String },
    /// Bitstamp confirmed a channel unsubscription
    UnsubscriptionSucceeded { channel: String },
    /// Bitstamp asks the client to reconnect
    RequestReconnect,
    /// Bitstamp reported an error
    Error { message: String },
    /// Anything else (unknown events, trades on unsupported channels)
    Ignored { event: String },
}

/// Parse a text frame from Bitstamp
pub fn parse_message(text: &str) -> Result<FeedMessage, BitstampError> {
    let envelope: BitstampEnvelope =
        serde_json::from_str(text).map_err(|e| BitstampError::Parse(e.to_string()))?;

    let message = match envelope.event.as_str() {
        EVENT_TRADE => match CurrencyPair::from_channel(&envelope.channel) {
            Some(pair) => {
                let data: TradeData = serde_json::from_value(envelope.data)
                    .map_err(|e| BitstampError::Parse(e.to_string()))?;
                FeedMessage::Trade {
                    pair,
                    trade: TradeEvent::from(&data),
                }
            }
            None => FeedMessage::Ignored {
                event: envelope.event,
            },
        },
        EVENT_SUBSCRIPTION_SUCCEEDED => FeedMessage::SubscriptionSucceeded {
            channel: envelope.channel,
        },
        EVENT_UNSUBSCRIPTION_SUCCEEDED => FeedMessage::UnsubscriptionSucceeded {
            channel: envelope.channel,
        },
        EVENT_REQUEST_RECONNECT => FeedMessage::RequestReconnect,
        EVENT_ERROR => FeedMessage::Error {
            message: envelope
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        },
        _ => FeedMessage::Ignored {
            event: envelope.event,
        },
    };

    Ok(message)
}
