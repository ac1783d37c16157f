//! Trailing-window OHLC aggregation

use ticker_core::{OhlcBar, TradeEvent};

/// Inclusive `[at - window_secs, at]` range for a bar ending at `at`
pub fn trailing_window(at: i64, window_secs: u64) -> (i64, i64) {
    (at.saturating_sub(window_secs as i64), at)
}

/// Build the bar ending at `at` from trades sorted by timestamp
///
/// Returns `None` for an empty slice.
pub fn compute_ohlc(trades: &[TradeEvent], at: i64) -> Option<OhlcBar> {
    let first = trades.first()?;
    let last = trades.last()?;

    let (high, low) = trades.iter().fold((first.price, first.price), |(high, low), trade| {
        (high.max(trade.price), low.min(trade.price))
    });

    Some(OhlcBar {
        timestamp: at,
        open: first.price,
        high,
        low,
        close: last.price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bar_from_trades() {
        let trades = vec![
            TradeEvent::new(100, dec!(100)),
            TradeEvent::new(110, dec!(105)),
            TradeEvent::new(120, dec!(98)),
            TradeEvent::new(130, dec!(102)),
        ];

        let bar = compute_ohlc(&trades, 130).unwrap();
        assert_eq!(bar.timestamp, 130);
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.high, dec!(105));
        assert_eq!(bar.low, dec!(98));
        assert_eq!(bar.close, dec!(102));
    }

    #[test]
    fn test_empty_window_has_no_bar() {
        assert_eq!(compute_ohlc(&[], 60), None);
    }

    #[test]
    fn test_single_trade() {
        let bar = compute_ohlc(&[TradeEvent::new(5, dec!(42.1))], 5).unwrap();
        assert_eq!(bar.open, bar.close);
        assert_eq!(bar.high, bar.low);
        assert_eq!(bar.high, dec!(42.1));
    }

    #[test]
    fn test_trailing_window_bounds() {
        assert_eq!(trailing_window(1_000, 60), (940, 1_000));
    }
}
