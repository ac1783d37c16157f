//! Upstream feed seam

use async_trait::async_trait;
use ticker_bitstamp::BitstampWebSocket;
use ticker_core::{CurrencyPair, RelayResult};

/// Control surface of the single upstream market-data session
///
/// Both calls resolve once the control message has been handed to the
/// transport, or fail with [`ticker_core::RelayError::UpstreamTransport`].
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    async fn subscribe(&self, pair: CurrencyPair) -> RelayResult<()>;

    async fn unsubscribe(&self, pair: CurrencyPair) -> RelayResult<()>;
}

#[async_trait]
impl UpstreamFeed for BitstampWebSocket {
    async fn subscribe(&self, pair: CurrencyPair) -> RelayResult<()> {
        BitstampWebSocket::subscribe(self, pair).await.map_err(Into::into)
    }

    async fn unsubscribe(&self, pair: CurrencyPair) -> RelayResult<()> {
        BitstampWebSocket::unsubscribe(self, pair).await.map_err(Into::into)
    }
}
