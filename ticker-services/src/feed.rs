//! Upstream feed pipeline
//!
//! [`UpstreamLink`] sends reference-counted (un)subscribe traffic to the
//! upstream session and reports failures to the initiating client.
//! [`FeedAdapter`] consumes upstream trades, records them, attaches the
//! trailing OHLC bar and emits a [`FeedEvent`] addressed to the current
//! subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use ticker_bitstamp::BitstampUpdate;
use ticker_core::{
    ClientId, CurrencyPair, EnrichedTrade, OhlcBar, RelayError, RelayResult, TradeEvent,
};

use crate::ohlc::{compute_ohlc, trailing_window};
use crate::time_series::{TimeSeriesStore, SERIES_OHLC, SERIES_TRADE};
use crate::{SubscriptionRegistry, UpstreamFeed};

/// Default trailing OHLC window in seconds
pub const DEFAULT_OHLC_WINDOW_SECS: u64 = 60;

/// Default bucket TTL in seconds
pub const DEFAULT_SERIES_TTL_SECS: u64 = 900;

/// Feed pipeline settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ohlc_window_secs: u64,
    pub series_ttl: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ohlc_window_secs: DEFAULT_OHLC_WINDOW_SECS,
            series_ttl: Duration::from_secs(DEFAULT_SERIES_TTL_SECS),
        }
    }
}

/// Events emitted towards the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A processed trade and the clients subscribed to its pair
    Trade {
        pair: CurrencyPair,
        trade: EnrichedTrade,
        subscribers: Vec<ClientId>,
    },
    /// An upstream request made on behalf of `client_id` failed
    Failure { client_id: ClientId, error: RelayError },
}

/// Sender half of the feed event stream
pub type FeedEventSender = mpsc::UnboundedSender<FeedEvent>;

/// Receiver half of the feed event stream
pub type FeedEventReceiver = mpsc::UnboundedReceiver<FeedEvent>;

/// Create the feed event stream
pub fn feed_events() -> (FeedEventSender, FeedEventReceiver) {
    mpsc::unbounded_channel()
}

// ============================================================================
// Upstream Link
// ============================================================================

/// Issues upstream (un)subscribe requests on behalf of a client
#[derive(Clone)]
pub struct UpstreamLink {
    feed: Arc<dyn UpstreamFeed>,
    events: FeedEventSender,
}

impl UpstreamLink {
    pub fn new(feed: Arc<dyn UpstreamFeed>, events: FeedEventSender) -> Self {
        Self { feed, events }
    }

    pub async fn subscribe_upstream(
        &self,
        initiator: &ClientId,
        pair: CurrencyPair,
    ) -> RelayResult<()> {
        let result = self.feed.subscribe(pair).await;
        self.report("subscribe", initiator, pair, result)
    }

    pub async fn unsubscribe_upstream(
        &self,
        initiator: &ClientId,
        pair: CurrencyPair,
    ) -> RelayResult<()> {
        let result = self.feed.unsubscribe(pair).await;
        self.report("unsubscribe", initiator, pair, result)
    }

    fn report(
        &self,
        action: &str,
        initiator: &ClientId,
        pair: CurrencyPair,
        result: RelayResult<()>,
    ) -> RelayResult<()> {
        match result {
            Ok(()) => {
                info!("[Feed] Upstream {} {} (for {})", action, pair, initiator);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[Feed] Upstream {} {} failed (for {}): {}",
                    action, pair, initiator, e
                );
                let _ = self.events.send(FeedEvent::Failure {
                    client_id: initiator.clone(),
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink").finish_non_exhaustive()
    }
}

// ============================================================================
// Feed Adapter
// ============================================================================

/// Turns upstream trades into enriched, addressed events
#[derive(Debug, Clone)]
pub struct FeedAdapter {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<TimeSeriesStore>,
    config: FeedConfig,
    events: FeedEventSender,
}

impl FeedAdapter {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<TimeSeriesStore>,
        config: FeedConfig,
        events: FeedEventSender,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            events,
        }
    }

    /// Record a trade, compute its trailing bar and emit it to subscribers
    ///
    /// Trades on pairs nobody is subscribed to are dropped without touching
    /// the store. The subscriber check and the writes happen as one step
    /// against unsubscribes, so a released pair's reclaimed series are never
    /// recreated. Returns the enriched trade when one was emitted.
    pub fn process_trade(
        &self,
        pair: CurrencyPair,
        trade: TradeEvent,
    ) -> RelayResult<Option<EnrichedTrade>> {
        let key = pair.as_str();
        let ttl = self.config.series_ttl;

        let recorded = self.registry.while_watched(pair, || -> RelayResult<Option<OhlcBar>> {
            self.store
                .store(SERIES_TRADE, key, &trade, trade.timestamp, ttl)?;

            let (from, to) = trailing_window(trade.timestamp, self.config.ohlc_window_secs);
            let window: Vec<TradeEvent> = self.store.query(SERIES_TRADE, key, from, to)?;
            let ohlc = compute_ohlc(&window, trade.timestamp);

            if let Some(bar) = &ohlc {
                self.store.store(SERIES_OHLC, key, bar, bar.timestamp, ttl)?;
            }
            Ok(ohlc)
        });

        let ohlc = match recorded {
            Some(result) => result?,
            None => {
                debug!("[Feed] Trade on unwatched pair {}, skipping", pair);
                return Ok(None);
            }
        };

        let enriched = EnrichedTrade {
            currency_pair: pair,
            timestamp: trade.timestamp,
            price: trade.price,
            ohlc,
        };

        // Subscribers are read after the writes so late joiners still get this trade
        let subscribers = self.registry.subscribers_of(pair);
        debug!(
            "[Feed] {} @ {} -> {} subscribers",
            pair,
            enriched.price,
            subscribers.len()
        );

        if self
            .events
            .send(FeedEvent::Trade {
                pair,
                trade: enriched.clone(),
                subscribers,
            })
            .is_err()
        {
            warn!("[Feed] Event stream closed, trade on {} not delivered", pair);
        }

        Ok(Some(enriched))
    }

    /// Consume upstream updates until the stream closes
    pub async fn run(self, mut updates: broadcast::Receiver<BitstampUpdate>) {
        info!("[Feed] Started");

        loop {
            match updates.recv().await {
                Ok(BitstampUpdate::Trade { pair, trade }) => {
                    if let Err(e) = self.process_trade(pair, trade) {
                        error!("[Feed] Skipping trade on {}: {}", pair, e);
                    }
                }
                Ok(BitstampUpdate::ConnectionState { state, error }) => match error {
                    Some(error) => warn!("[Feed] Upstream {:?}: {}", state, error),
                    None => debug!("[Feed] Upstream {:?}", state),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[Feed] Lagged behind upstream, skipped {} updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("[Feed] Upstream update stream closed");
                    break;
                }
            }
        }
    }
}
