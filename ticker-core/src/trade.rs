//! Trade and OHLC payloads

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::CurrencyPair;

/// A single trade observed on the upstream feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Execution price
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl TradeEvent {
    pub fn new(timestamp: i64, price: Decimal) -> Self {
        Self { timestamp, price }
    }
}

/// Open/high/low/close summary over a trailing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcBar {
    /// End of the window (unix seconds)
    pub timestamp: i64,
    /// Price of the earliest trade in the window
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    /// Highest price in the window
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Lowest price in the window
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Price of the latest trade in the window
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
}

/// Trade forwarded to subscribers, enriched with the trailing OHLC bar
///
/// `ohlc` is `None` when the window held no trades. Consumers treat that as
/// insufficient data, never as zero prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedTrade {
    pub currency_pair: CurrencyPair,
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub ohlc: Option<OhlcBar>,
}
