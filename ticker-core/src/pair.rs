//! Tradable currency pairs
//!
//! The set is closed: anything a client sends that is not listed here is
//! rejected at the protocol boundary and never reaches a registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::RelayError;

/// Prefix of the upstream live-trade channel names
pub const LIVE_TRADES_PREFIX: &str = "live_trades_";

/// Currency pairs that can be streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyPair {
    BtcUsd,
    BtcEur,
    BtcGbp,
    BtcUsdc,
    EthUsd,
    EthEur,
    EthGbp,
    EthBtc,
    XrpUsd,
    XrpEur,
    XrpBtc,
    LtcUsd,
    LtcEur,
    LtcBtc,
    BchUsd,
    BchEur,
    BchBtc,
    LinkUsd,
    LinkEur,
    SolUsd,
    AdaUsd,
    EurUsd,
    GbpUsd,
    UsdcUsd,
}

impl CurrencyPair {
    /// Every supported pair
    pub const ALL: [CurrencyPair; 24] = [
        CurrencyPair::BtcUsd,
        CurrencyPair::BtcEur,
        CurrencyPair::BtcGbp,
        CurrencyPair::BtcUsdc,
        CurrencyPair::EthUsd,
        CurrencyPair::EthEur,
        CurrencyPair::EthGbp,
        CurrencyPair::EthBtc,
        CurrencyPair::XrpUsd,
        CurrencyPair::XrpEur,
        CurrencyPair::XrpBtc,
        CurrencyPair::LtcUsd,
        CurrencyPair::LtcEur,
        CurrencyPair::LtcBtc,
        CurrencyPair::BchUsd,
        CurrencyPair::BchEur,
        CurrencyPair::BchBtc,
        CurrencyPair::LinkUsd,
        CurrencyPair::LinkEur,
        CurrencyPair::SolUsd,
        CurrencyPair::AdaUsd,
        CurrencyPair::EurUsd,
        CurrencyPair::GbpUsd,
        CurrencyPair::UsdcUsd,
    ];

    /// Lowercase symbol as used on the wire (e.g. `btcusd`)
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyPair::BtcUsd => "btcusd",
            CurrencyPair::BtcEur => "btceur",
            CurrencyPair::BtcGbp => "btcgbp",
            CurrencyPair::BtcUsdc => "btcusdc",
            CurrencyPair::EthUsd => "ethusd",
            CurrencyPair::EthEur => "etheur",
            CurrencyPair::EthGbp => "ethgbp",
            CurrencyPair::EthBtc => "ethbtc",
            CurrencyPair::XrpUsd => "xrpusd",
            CurrencyPair::XrpEur => "xrpeur",
            CurrencyPair::XrpBtc => "xrpbtc",
            CurrencyPair::LtcUsd => "ltcusd",
            CurrencyPair::LtcEur => "ltceur",
            CurrencyPair::LtcBtc => "ltcbtc",
            CurrencyPair::BchUsd => "bchusd",
            CurrencyPair::BchEur => "bcheur",
            CurrencyPair::BchBtc => "bchbtc",
            CurrencyPair::LinkUsd => "linkusd",
            CurrencyPair::LinkEur => "linkeur",
            CurrencyPair::SolUsd => "solusd",
            CurrencyPair::AdaUsd => "adausd",
            CurrencyPair::EurUsd => "eurusd",
            CurrencyPair::GbpUsd => "gbpusd",
            CurrencyPair::UsdcUsd => "usdcusd",
        }
    }

    /// Upstream live-trade channel for this pair (`live_trades_btcusd`)
    pub fn live_trades_channel(&self) -> String {
        format!("{}{}", LIVE_TRADES_PREFIX, self.as_str())
    }

    /// Extract the pair from an upstream channel name
    ///
    /// The pair is the third `_`-separated segment of `live_trades_<pair>`.
    pub fn from_channel(channel: &str) -> Option<Self> {
        let mut segments = channel.split('_');
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some("live"), Some("trades"), Some(pair), None) => pair.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyPair {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        CurrencyPair::ALL
            .iter()
            .copied()
            .find(|pair| pair.as_str() == needle)
            .ok_or_else(|| RelayError::validation(format!("Unknown currency pair: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_pair() {
        assert_eq!("btcusd".parse::<CurrencyPair>().unwrap(), CurrencyPair::BtcUsd);
        assert_eq!("ETHEUR".parse::<CurrencyPair>().unwrap(), CurrencyPair::EthEur);
    }

    #[test]
    fn test_reject_unknown_pair() {
        let err = "dogeusd".parse::<CurrencyPair>().unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_serde_matches_as_str() {
        for pair in CurrencyPair::ALL {
            let json = serde_json::to_string(&pair).unwrap();
            assert_eq!(json, format!("\"{}\"", pair.as_str()));
        }
    }

    #[test]
    fn test_channel_round_trip() {
        assert_eq!(CurrencyPair::BtcUsd.live_trades_channel(), "live_trades_btcusd");
        assert_eq!(
            CurrencyPair::from_channel("live_trades_xrpbtc"),
            Some(CurrencyPair::XrpBtc)
        );
        assert_eq!(CurrencyPair::from_channel("live_orders_btcusd"), None);
        assert_eq!(CurrencyPair::from_channel("live_trades_nope"), None);
    }
}
