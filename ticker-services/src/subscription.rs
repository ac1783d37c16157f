//! Client <-> currency pair subscription registry
//!
//! Keeps both directions of the mapping under one lock so they never
//! disagree, and drives upstream traffic only on a pair's 0 -> 1 and 1 -> 0
//! subscriber transitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ticker_core::{ClientId, CurrencyPair, RelayResult};

use crate::feed::UpstreamLink;
use crate::time_series::{TimeSeriesStore, SERIES_OHLC, SERIES_TRADE};

#[derive(Debug, Default)]
struct RegistryState {
    /// pair -> clients interested in it
    registrations: HashMap<CurrencyPair, HashSet<ClientId>>,
    /// client -> pairs it holds
    subscriptions: HashMap<ClientId, HashSet<CurrencyPair>>,
}

impl RegistryState {
    fn insert(&mut self, client_id: &ClientId, pair: CurrencyPair) {
        self.registrations
            .entry(pair)
            .or_default()
            .insert(client_id.clone());
        self.subscriptions
            .entry(client_id.clone())
            .or_default()
            .insert(pair);
    }

    /// Remove one edge; returns whether the pair is now unwatched
    fn remove(&mut self, client_id: &ClientId, pair: CurrencyPair) -> bool {
        let mut now_empty = false;
        if let Some(clients) = self.registrations.get_mut(&pair) {
            clients.remove(client_id);
            if clients.is_empty() {
                self.registrations.remove(&pair);
                now_empty = true;
            }
        }
        if let Some(pairs) = self.subscriptions.get_mut(client_id) {
            pairs.remove(&pair);
            if pairs.is_empty() {
                self.subscriptions.remove(client_id);
            }
        }
        now_empty
    }

    fn contains(&self, client_id: &ClientId, pair: CurrencyPair) -> bool {
        self.registrations
            .get(&pair)
            .is_some_and(|clients| clients.contains(client_id))
    }
}

/// Bidirectional subscription registry with reference-counted upstream
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    /// Serializes subscriber-count transitions per pair
    gates: DashMap<CurrencyPair, Arc<tokio::sync::Mutex<()>>>,
    upstream: UpstreamLink,
    store: Arc<TimeSeriesStore>,
}

impl SubscriptionRegistry {
    pub fn new(upstream: UpstreamLink, store: Arc<TimeSeriesStore>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            gates: DashMap::new(),
            upstream,
            store,
        }
    }

    fn gate(&self, pair: CurrencyPair) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.gates.entry(pair).or_default())
    }

    /// Subscribe `client_id` to `pair`
    ///
    /// The first subscriber of a pair triggers an upstream subscribe and the
    /// registry only changes once that succeeds. Later subscribers commit
    /// without upstream traffic. Re-subscribing is a no-op.
    pub async fn subscribe(&self, client_id: &ClientId, pair: CurrencyPair) -> RelayResult<()> {
        let gate = self.gate(pair);
        let _transition = gate.lock().await;

        let needs_upstream = {
            let state = self.state.lock();
            if state.contains(client_id, pair) {
                return Ok(());
            }
            !state.registrations.contains_key(&pair)
        };

        if needs_upstream {
            self.upstream.subscribe_upstream(client_id, pair).await?;
        }

        self.state.lock().insert(client_id, pair);
        debug!("{} subscribed to {}", client_id, pair);
        Ok(())
    }

    /// Unsubscribe `client_id` from `pair`
    ///
    /// The local change always happens. When the last subscriber leaves, the
    /// upstream channel is dropped and, once that succeeds, the pair's stored
    /// series are deleted. An upstream failure is returned after the local
    /// removal.
    pub async fn unsubscribe(&self, client_id: &ClientId, pair: CurrencyPair) -> RelayResult<()> {
        let gate = self.gate(pair);
        let _transition = gate.lock().await;

        let now_empty = {
            let mut state = self.state.lock();
            if !state.contains(client_id, pair) {
                return Ok(());
            }
            state.remove(client_id, pair)
        };
        debug!("{} unsubscribed from {}", client_id, pair);

        if now_empty {
            self.upstream.unsubscribe_upstream(client_id, pair).await?;
            self.store.delete(SERIES_TRADE, pair.as_str());
            self.store.delete(SERIES_OHLC, pair.as_str());
            info!("{} has no subscribers, released", pair);
        }
        Ok(())
    }

    /// Drop every subscription held by `client_id`
    pub async fn unregister_all(&self, client_id: &ClientId) {
        let mut pairs: Vec<CurrencyPair> = self.subscriptions_of(client_id).into_iter().collect();
        pairs.sort();

        for pair in pairs {
            if let Err(e) = self.unsubscribe(client_id, pair).await {
                warn!("Releasing {} for {} failed upstream: {}", pair, client_id, e);
            }
        }
    }

    /// Snapshot of the pairs held by `client_id`
    pub fn subscriptions_of(&self, client_id: &ClientId) -> HashSet<CurrencyPair> {
        self.state
            .lock()
            .subscriptions
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the clients subscribed to `pair`
    pub fn subscribers_of(&self, pair: CurrencyPair) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self
            .state
            .lock()
            .registrations
            .get(&pair)
            .map(|clients| clients.iter().cloned().collect())
            .unwrap_or_default();
        clients.sort();
        clients
    }

    pub fn subscriber_count(&self, pair: CurrencyPair) -> usize {
        self.state
            .lock()
            .registrations
            .get(&pair)
            .map_or(0, HashSet::len)
    }

    /// Pairs with at least one subscriber
    pub fn active_pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> =
            self.state.lock().registrations.keys().copied().collect();
        pairs.sort();
        pairs
    }

    /// Run `record` only while `pair` has subscribers
    ///
    /// The registry lock is held for the duration, so a last unsubscribe
    /// lands either before (nothing is recorded) or after (its store reclaim
    /// removes what was recorded). `record` must not call back into the
    /// registry.
    pub fn while_watched<T>(&self, pair: CurrencyPair, record: impl FnOnce() -> T) -> Option<T> {
        let state = self.state.lock();
        if !state.registrations.contains_key(&pair) {
            return None;
        }
        let result = record();
        drop(state);
        Some(result)
    }

    /// Check that both directions of the mapping agree
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let forward = state.registrations.iter().all(|(pair, clients)| {
            !clients.is_empty()
                && clients.iter().all(|client| {
                    state
                        .subscriptions
                        .get(client)
                        .is_some_and(|pairs| pairs.contains(pair))
                })
        });
        let backward = state.subscriptions.iter().all(|(client, pairs)| {
            !pairs.is_empty() && pairs.iter().all(|pair| state.contains(client, *pair))
        });
        forward && backward
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("pairs", &state.registrations.len())
            .field("clients", &state.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{feed_events, FeedEvent, FeedEventReceiver};
    use crate::testing::{Call, RecordingFeed};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use ticker_core::{RelayError, TradeEvent};

    fn registry() -> (
        Arc<SubscriptionRegistry>,
        Arc<RecordingFeed>,
        Arc<TimeSeriesStore>,
        FeedEventReceiver,
    ) {
        let (events_tx, events_rx) = feed_events();
        let feed = Arc::new(RecordingFeed::default());
        let store = Arc::new(TimeSeriesStore::new());
        let link = UpstreamLink::new(feed.clone(), events_tx);
        let registry = Arc::new(SubscriptionRegistry::new(link, Arc::clone(&store)));
        (registry, feed, store, events_rx)
    }

    #[tokio::test]
    async fn test_upstream_once_per_transition() {
        let (registry, feed, _store, _events) = registry();
        let clients: Vec<ClientId> = ["a", "b", "c"].into_iter().map(ClientId::new).collect();

        for client in &clients {
            registry.subscribe(client, CurrencyPair::BtcUsd).await.unwrap();
        }
        assert_eq!(feed.calls(), vec![Call::Subscribe(CurrencyPair::BtcUsd)]);
        assert_eq!(registry.subscriber_count(CurrencyPair::BtcUsd), 3);

        for client in &clients {
            registry.unsubscribe(client, CurrencyPair::BtcUsd).await.unwrap();
        }
        assert_eq!(
            feed.calls(),
            vec![
                Call::Subscribe(CurrencyPair::BtcUsd),
                Call::Unsubscribe(CurrencyPair::BtcUsd)
            ]
        );
        assert!(registry.active_pairs().is_empty());
        assert!(registry.is_consistent());
    }

    #[tokio::test]
    async fn test_concurrent_first_subscribers() {
        let (registry, feed, _store, _events) = registry();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .subscribe(&ClientId::new(format!("c{}", i)), CurrencyPair::EthUsd)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(feed.calls(), vec![Call::Subscribe(CurrencyPair::EthUsd)]);
        assert_eq!(registry.subscriber_count(CurrencyPair::EthUsd), 8);
        assert!(registry.is_consistent());
    }

    #[tokio::test]
    async fn test_resubscribe_is_noop() {
        let (registry, feed, _store, _events) = registry();
        let a = ClientId::new("a");

        registry.subscribe(&a, CurrencyPair::BtcUsd).await.unwrap();
        registry.subscribe(&a, CurrencyPair::BtcUsd).await.unwrap();

        assert_eq!(feed.calls().len(), 1);
        assert_eq!(registry.subscriber_count(CurrencyPair::BtcUsd), 1);
    }

    #[tokio::test]
    async fn test_failed_upstream_subscribe_not_committed() {
        let (registry, feed, _store, mut events) = registry();
        let a = ClientId::new("a");
        feed.fail_on(CurrencyPair::LtcUsd);

        let result = registry.subscribe(&a, CurrencyPair::LtcUsd).await;
        assert!(matches!(result, Err(RelayError::UpstreamTransport(_))));
        assert!(registry.subscriptions_of(&a).is_empty());
        assert_eq!(registry.subscriber_count(CurrencyPair::LtcUsd), 0);

        match events.try_recv().unwrap() {
            FeedEvent::Failure { client_id, .. } => assert_eq!(client_id, a),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let (registry, feed, _store, _events) = registry();

        registry
            .unsubscribe(&ClientId::new("a"), CurrencyPair::BtcUsd)
            .await
            .unwrap();

        assert!(feed.calls().is_empty());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_deletes_series() {
        let (registry, _feed, store, _events) = registry();
        let a = ClientId::new("a");
        let ttl = Duration::from_secs(900);

        registry.subscribe(&a, CurrencyPair::BtcUsd).await.unwrap();
        store
            .store(SERIES_TRADE, "btcusd", &TradeEvent::new(1, dec!(1)), 1, ttl)
            .unwrap();
        store
            .store(SERIES_OHLC, "btcusd", &TradeEvent::new(1, dec!(1)), 1, ttl)
            .unwrap();

        registry.unsubscribe(&a, CurrencyPair::BtcUsd).await.unwrap();

        assert_eq!(store.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upstream_unsubscribe_still_local() {
        let (registry, feed, store, _events) = registry();
        let a = ClientId::new("a");

        registry.subscribe(&a, CurrencyPair::BtcUsd).await.unwrap();
        store
            .store(SERIES_TRADE, "btcusd", &TradeEvent::new(1, dec!(1)), 1, Duration::from_secs(900))
            .unwrap();
        feed.fail_on(CurrencyPair::BtcUsd);

        assert!(registry.unsubscribe(&a, CurrencyPair::BtcUsd).await.is_err());
        assert!(registry.subscriptions_of(&a).is_empty());
        assert!(registry.active_pairs().is_empty());
        // Series left to expire on their own
        assert!(store.contains(SERIES_TRADE, "btcusd"));
    }

    #[tokio::test]
    async fn test_unregister_all_releases_sole_pairs_only() {
        let (registry, feed, _store, _events) = registry();
        let a = ClientId::new("a");
        let b = ClientId::new("b");

        registry.subscribe(&a, CurrencyPair::BtcUsd).await.unwrap();
        registry.subscribe(&a, CurrencyPair::EthUsd).await.unwrap();
        registry.subscribe(&b, CurrencyPair::EthUsd).await.unwrap();

        registry.unregister_all(&a).await;

        let calls = feed.calls();
        assert!(calls.contains(&Call::Unsubscribe(CurrencyPair::BtcUsd)));
        assert!(!calls.contains(&Call::Unsubscribe(CurrencyPair::EthUsd)));
        assert!(registry.subscriptions_of(&a).is_empty());
        assert_eq!(registry.subscribers_of(CurrencyPair::EthUsd), vec![b]);
        assert!(registry.is_consistent());

        // Safe with nothing held
        registry.unregister_all(&a).await;
    }

    #[tokio::test]
    async fn test_while_watched() {
        let (registry, _feed, _store, _events) = registry();
        assert_eq!(registry.while_watched(CurrencyPair::BtcUsd, || 1), None);

        registry
            .subscribe(&ClientId::new("a"), CurrencyPair::BtcUsd)
            .await
            .unwrap();
        assert_eq!(registry.while_watched(CurrencyPair::BtcUsd, || 1), Some(1));
        assert_eq!(registry.while_watched(CurrencyPair::EthUsd, || 1), None);
    }

    #[tokio::test]
    async fn test_random_sequences_stay_consistent() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let (registry, feed, _store, _events) = registry();
        let clients: Vec<ClientId> = (0..6).map(|i| ClientId::new(format!("c{}", i))).collect();
        let pairs = &CurrencyPair::ALL[..5];

        for seed in [7u64, 42, 1_337] {
            let mut rng = StdRng::seed_from_u64(seed);

            for step in 0..300 {
                let client = &clients[rng.random_range(0..clients.len())];
                let pair = pairs[rng.random_range(0..pairs.len())];

                match rng.random_range(0..10) {
                    0 => registry.unregister_all(client).await,
                    1..=5 => registry.subscribe(client, pair).await.unwrap(),
                    _ => registry.unsubscribe(client, pair).await.unwrap(),
                }

                assert!(registry.is_consistent(), "seed {} step {}", seed, step);
                for pair in pairs {
                    let count = registry.subscriber_count(*pair);
                    assert_eq!(count, registry.subscribers_of(*pair).len());
                    let held = clients
                        .iter()
                        .filter(|client| registry.subscriptions_of(client).contains(pair))
                        .count();
                    assert_eq!(count, held, "seed {} step {}", seed, step);
                }
            }
        }

        // Upstream traffic alternates per pair: never two subscribes in a row
        let calls = feed.calls();
        for pair in pairs {
            let mut watched = false;
            for call in &calls {
                match call {
                    Call::Subscribe(p) if p == pair => {
                        assert!(!watched);
                        watched = true;
                    }
                    Call::Unsubscribe(p) if p == pair => {
                        assert!(watched);
                        watched = false;
                    }
                    _ => {}
                }
            }
            assert_eq!(watched, registry.subscriber_count(*pair) > 0);
        }
    }
}
