//! Streaming gateway
//!
//! Orchestrates the life of each streaming connection: identity on connect,
//! subscribe/unsubscribe commands, fan-out of feed events, and cleanup on
//! disconnect.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use ticker_core::{
    ClientId, ClientMessage, CurrencyPair, RelayError, RelayResult, ServerMessage,
};

use crate::client_registry::{ClientChannel, ClientRegistry, DEFAULT_ID_ATTEMPTS};
use crate::feed::{FeedEvent, FeedEventReceiver};
use crate::SubscriptionRegistry;

/// Default cap on pairs a single client may hold
pub const DEFAULT_MAX_PAIRS_PER_CLIENT: usize = 10;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_pairs_per_client: usize,
    /// Outbound frames buffered per client before messages are dropped
    pub outbound_buffer: usize,
    pub id_attempts: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_pairs_per_client: DEFAULT_MAX_PAIRS_PER_CLIENT,
            outbound_buffer: 256,
            id_attempts: DEFAULT_ID_ATTEMPTS,
        }
    }
}

/// Snapshot for health reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStats {
    pub clients: usize,
    pub active_pairs: Vec<CurrencyPair>,
}

/// Per-client orchestration over the shared registries
#[derive(Debug)]
pub struct Gateway {
    clients: Arc<ClientRegistry>,
    registry: Arc<SubscriptionRegistry>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        clients: Arc<ClientRegistry>,
        registry: Arc<SubscriptionRegistry>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            clients,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            clients: self.clients.len(),
            active_pairs: self.registry.active_pairs(),
        }
    }

    /// Register a new connection
    pub fn connect(&self, channel: ClientChannel) -> RelayResult<ClientId> {
        let client_id = self.clients.register(channel)?;
        info!("[Gateway] {} connected", client_id);
        Ok(client_id)
    }

    /// Release everything held by a connection
    pub async fn disconnect(&self, client_id: &ClientId) {
        self.registry.unregister_all(client_id).await;
        self.clients.unregister(client_id);
        info!("[Gateway] {} disconnected", client_id);
    }

    /// Handle one text frame from a client
    ///
    /// Malformed frames and rejected commands are answered with an error
    /// frame on the client's own channel.
    pub async fn handle_message(&self, client_id: &ClientId, text: &str) {
        let command = match serde_json::from_str::<ClientMessage>(text) {
            Ok(command) => command,
            Err(e) => {
                debug!("[Gateway] Invalid message from {}: {}", client_id, e);
                let error = RelayError::validation(format!("Invalid message: {}", e));
                self.clients
                    .send(client_id, ServerMessage::error(error.to_string()));
                return;
            }
        };

        if let Err(e) = self.handle_command(client_id, command).await {
            self.clients.send(client_id, ServerMessage::error(e.to_string()));
        }
    }

    /// Apply a parsed command
    ///
    /// Only whole-request rejections are returned. Per-pair upstream
    /// failures reach the client through [`FeedEvent::Failure`].
    pub async fn handle_command(
        &self,
        client_id: &ClientId,
        command: ClientMessage,
    ) -> RelayResult<()> {
        match command {
            ClientMessage::Subscribe(selection) => {
                let requested: BTreeSet<CurrencyPair> =
                    selection.currency_pairs.into_iter().collect();
                let current = self.registry.subscriptions_of(client_id);

                let merged = current.iter().chain(requested.iter()).collect::<BTreeSet<_>>();
                if merged.len() > self.config.max_pairs_per_client {
                    info!(
                        "[Gateway] {} rejected: {} pairs requested, cap is {}",
                        client_id,
                        merged.len(),
                        self.config.max_pairs_per_client
                    );
                    return Err(RelayError::capacity(format!(
                        "max currency pairs is {}",
                        self.config.max_pairs_per_client
                    )));
                }

                for pair in requested.into_iter().filter(|pair| !current.contains(pair)) {
                    if let Err(e) = self.registry.subscribe(client_id, pair).await {
                        debug!("[Gateway] {} could not subscribe {}: {}", client_id, pair, e);
                    }
                }
            }
            ClientMessage::Unsubscribe(selection) => {
                for pair in selection.currency_pairs {
                    if let Err(e) = self.registry.unsubscribe(client_id, pair).await {
                        debug!("[Gateway] {} unsubscribe {} upstream error: {}", client_id, pair, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Deliver a feed event to the clients it names
    pub fn handle_feed_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Trade {
                pair,
                trade,
                subscribers,
            } => {
                let message = ServerMessage::Trade(trade);
                let delivered = subscribers
                    .iter()
                    .filter(|client_id| self.clients.send(client_id, message.clone()))
                    .count();
                debug!(
                    "[Gateway] {} trade delivered to {}/{}",
                    pair,
                    delivered,
                    subscribers.len()
                );
            }
            FeedEvent::Failure { client_id, error } => {
                if !self.clients.send(&client_id, ServerMessage::error(error.to_string())) {
                    debug!("[Gateway] Failure for {} not delivered: {}", client_id, error);
                }
            }
        }
    }

    /// Drain the feed event stream until it closes
    pub async fn run_events(self: Arc<Self>, mut events: FeedEventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle_feed_event(event);
        }
        info!("[Gateway] Feed event stream closed");
    }

    /// Drive one streaming connection until either side goes away
    pub async fn handle_connection<Tx, Rx>(&self, mut sink: Tx, mut stream: Rx)
    where
        Tx: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
        Rx: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let (outgoing_tx, mut outgoing_rx) =
            mpsc::channel::<ServerMessage>(self.config.outbound_buffer);

        let client_id = match self.connect(outgoing_tx) {
            Ok(client_id) => client_id,
            Err(e) => {
                warn!("[Gateway] Refusing connection: {}", e);
                if let Ok(json) = serde_json::to_string(&ServerMessage::error(e.to_string())) {
                    let _ = sink.send(Message::Text(json.into())).await;
                }
                let _ = sink.close().await;
                return;
            }
        };

        // Task: serialize outgoing messages onto the socket
        let send_task = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("[Gateway] Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_message(&client_id, &text).await,
                Ok(Message::Binary(_)) => {
                    self.clients.send(
                        &client_id,
                        ServerMessage::error("Binary frames are not supported"),
                    );
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("[Gateway] Socket error for {}: {}", client_id, e);
                    break;
                }
            }
        }

        self.disconnect(&client_id).await;
        send_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{feed_events, UpstreamLink};
    use crate::testing::{Call, RecordingFeed};
    use crate::TimeSeriesStore;
    use rust_decimal_macros::dec;
    use ticker_core::{EnrichedTrade, PairSelection};

    struct Harness {
        gateway: Gateway,
        feed: Arc<RecordingFeed>,
        events: FeedEventReceiver,
    }

    fn harness() -> Harness {
        let (events_tx, events) = feed_events();
        let feed = Arc::new(RecordingFeed::default());
        let link = UpstreamLink::new(feed.clone(), events_tx);
        let registry = Arc::new(SubscriptionRegistry::new(
            link,
            Arc::new(TimeSeriesStore::new()),
        ));
        let gateway = Gateway::new(
            Arc::new(ClientRegistry::default()),
            registry,
            GatewayConfig::default(),
        );
        Harness {
            gateway,
            feed,
            events,
        }
    }

    fn subscribe(pairs: &[CurrencyPair]) -> String {
        serde_json::to_string(&ClientMessage::Subscribe(PairSelection::new(
            pairs.iter().copied(),
        )))
        .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.gateway.connect(tx).unwrap();

        h.gateway
            .handle_message(&id, &subscribe(&[CurrencyPair::BtcUsd]))
            .await;
        assert_eq!(h.feed.calls(), vec![Call::Subscribe(CurrencyPair::BtcUsd)]);

        let trade = EnrichedTrade {
            currency_pair: CurrencyPair::BtcUsd,
            timestamp: 1,
            price: dec!(100),
            ohlc: None,
        };
        h.gateway.handle_feed_event(FeedEvent::Trade {
            pair: CurrencyPair::BtcUsd,
            trade: trade.clone(),
            subscribers: vec![id.clone(), ClientId::new("gone")],
        });

        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Trade(trade));
    }

    #[tokio::test]
    async fn test_cap_rejects_whole_batch() {
        let h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.gateway.connect(tx).unwrap();

        let first: Vec<CurrencyPair> = CurrencyPair::ALL[..8].to_vec();
        h.gateway.handle_message(&id, &subscribe(&first)).await;
        assert_eq!(h.gateway.registry().subscriptions_of(&id).len(), 8);

        // 8 held + 3 new = 11
        let more: Vec<CurrencyPair> = CurrencyPair::ALL[7..11].to_vec();
        h.gateway.handle_message(&id, &subscribe(&more)).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::error("max currency pairs is 10")
        );
        assert_eq!(h.gateway.registry().subscriptions_of(&id).len(), 8);
        assert_eq!(h.feed.calls().len(), 8);

        // Overlapping pairs count once
        let fits: Vec<CurrencyPair> = CurrencyPair::ALL[6..10].to_vec();
        h.gateway.handle_message(&id, &subscribe(&fits)).await;
        assert_eq!(h.gateway.registry().subscriptions_of(&id).len(), 10);
    }

    #[tokio::test]
    async fn test_invalid_message_answered_with_error() {
        let h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.gateway.connect(tx).unwrap();

        h.gateway
            .handle_message(&id, r#"{"event":"subscribe","data":{"currencyPairs":["dogeusd"]}}"#)
            .await;
        h.gateway.handle_message(&id, "garbage").await;

        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                ServerMessage::Error { message } => assert!(message.contains("Invalid message")),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert!(h.feed.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_batch_failure_is_per_pair() {
        let mut h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.gateway.connect(tx).unwrap();
        h.feed.fail_on(CurrencyPair::EthUsd);

        h.gateway
            .handle_message(&id, &subscribe(&[CurrencyPair::BtcUsd, CurrencyPair::EthUsd]))
            .await;

        let held = h.gateway.registry().subscriptions_of(&id);
        assert!(held.contains(&CurrencyPair::BtcUsd));
        assert!(!held.contains(&CurrencyPair::EthUsd));

        // The failure travels through the feed event stream
        let event = h.events.recv().await.unwrap();
        h.gateway.handle_feed_event(event);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions() {
        let h = harness();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        let a = h.gateway.connect(tx_a).unwrap();
        let b = h.gateway.connect(tx_b).unwrap();

        h.gateway
            .handle_message(&a, &subscribe(&[CurrencyPair::BtcUsd, CurrencyPair::EthUsd]))
            .await;
        h.gateway
            .handle_message(&b, &subscribe(&[CurrencyPair::EthUsd]))
            .await;

        h.gateway.disconnect(&a).await;

        let calls = h.feed.calls();
        assert!(calls.contains(&Call::Unsubscribe(CurrencyPair::BtcUsd)));
        assert!(!calls.contains(&Call::Unsubscribe(CurrencyPair::EthUsd)));
        assert_eq!(
            h.gateway.stats(),
            GatewayStats {
                clients: 1,
                active_pairs: vec![CurrencyPair::EthUsd],
            }
        );
    }

    #[tokio::test]
    async fn test_exhausted_identity_closes_connection() {
        let (events_tx, _events) = feed_events();
        let link = UpstreamLink::new(Arc::new(RecordingFeed::default()), events_tx);
        let registry = Arc::new(SubscriptionRegistry::new(
            link,
            Arc::new(TimeSeriesStore::new()),
        ));
        let clients = Arc::new(ClientRegistry::with_id_generator(10, || "same".to_string()));
        let gateway = Gateway::new(clients, registry, GatewayConfig::default());

        let (tx, _rx) = mpsc::channel(1);
        gateway.connect(tx).unwrap();

        let (sink_tx, mut sink_rx) = futures::channel::mpsc::unbounded::<Message>();
        let sink = sink_tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        let stream = futures_util::stream::pending::<Result<Message, tungstenite::Error>>();

        gateway.handle_connection(sink, stream).await;

        let frame = sink_rx.next().await.unwrap();
        let text = frame.into_text().unwrap();
        let message: ServerMessage = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(
            message,
            ServerMessage::error("Cannot generate socket id, connect to server failed")
        );
        assert_eq!(gateway.clients().len(), 1);
    }
}
