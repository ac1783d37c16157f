//! Bitstamp WebSocket client for live trades
//!
//! Keeps one connection to Bitstamp open and multiplexes every active
//! `live_trades_<pair>` channel over it. Subscribe and unsubscribe requests
//! are sent to the connection task as commands and resolve once the control
//! frame has been written to the socket.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, warn};

use ticker_core::{ConnectionState, CurrencyPair, TradeEvent};

use crate::types::{parse_message, BitstampCommand, FeedMessage};
use crate::BitstampError;

/// Bitstamp public WebSocket URL
pub const BITSTAMP_WS_URL: &str = "wss://ws.bitstamp.net";

/// Reconnect delay base
const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);

/// Max reconnect attempts
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// Normalized Update Types
// ============================================================================

/// Normalized update from the Bitstamp connection
#[derive(Debug, Clone)]
pub enum BitstampUpdate {
    /// A trade on a subscribed pair
    Trade { pair: CurrencyPair, trade: TradeEvent },
    /// Connection state change
    ConnectionState {
        state: ConnectionState,
        error: Option<String>,
    },
}

// ============================================================================
// Bitstamp WebSocket Client
// ============================================================================

/// Configuration for BitstampWebSocket
#[derive(Clone, Debug)]
pub struct BitstampWebSocketConfig {
    pub url: String,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Upper bound on a subscribe/unsubscribe round trip
    pub command_timeout: Duration,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
}

impl Default for BitstampWebSocketConfig {
    fn default() -> Self {
        Self {
            url: BITSTAMP_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Commands sent to the WebSocket task
#[derive(Debug)]
enum WebSocketCommand {
    Subscribe {
        pair: CurrencyPair,
        reply: oneshot::Sender<Result<(), BitstampError>>,
    },
    Unsubscribe {
        pair: CurrencyPair,
        reply: oneshot::Sender<Result<(), BitstampError>>,
    },
}

impl WebSocketCommand {
    fn reject(self, err: BitstampError) {
        let reply = match self {
            WebSocketCommand::Subscribe { reply, .. } => reply,
            WebSocketCommand::Unsubscribe { reply, .. } => reply,
        };
        let _ = reply.send(Err(err));
    }
}

/// Bitstamp WebSocket client
pub struct BitstampWebSocket {
    config: BitstampWebSocketConfig,
    /// Channel to send updates to the feed pipeline
    update_tx: broadcast::Sender<BitstampUpdate>,
    /// Pairs with a live upstream channel (replayed on reconnect)
    channels: Arc<RwLock<HashSet<CurrencyPair>>>,
    /// Command sender to the WebSocket task
    command_tx: Option<mpsc::Sender<WebSocketCommand>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl BitstampWebSocket {
    /// Create a new Bitstamp WebSocket client
    pub fn new(config: BitstampWebSocketConfig) -> (Self, broadcast::Receiver<BitstampUpdate>) {
        let (update_tx, update_rx) = broadcast::channel(1024);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        (
            Self {
                config,
                update_tx,
                channels: Arc::new(RwLock::new(HashSet::new())),
                command_tx: None,
                state_tx: Arc::new(state_tx),
            },
            update_rx,
        )
    }

    /// Start the connection task
    pub fn start(&mut self) {
        if self.command_tx.is_some() {
            warn!("[Bitstamp WS] Already started");
            return;
        }

        let (command_tx, command_rx) = mpsc::channel::<WebSocketCommand>(100);
        self.command_tx = Some(command_tx);

        let config = self.config.clone();
        let update_tx = self.update_tx.clone();
        let channels = Arc::clone(&self.channels);
        let state_tx = Arc::clone(&self.state_tx);

        tokio::spawn(async move {
            Self::connection_loop(config, update_tx, command_rx, channels, state_tx).await;
        });
    }

    /// Current upstream connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch upstream connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Pairs that currently have an upstream channel
    pub async fn active_channels(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> = self.channels.read().await.iter().copied().collect();
        pairs.sort();
        pairs
    }

    /// Subscribe to live trades for a pair
    ///
    /// Resolves once the `bts:subscribe` frame has been written.
    pub async fn subscribe(&self, pair: CurrencyPair) -> Result<(), BitstampError> {
        self.request(|reply| WebSocketCommand::Subscribe { pair, reply })
            .await
    }

    /// Unsubscribe from live trades for a pair
    pub async fn unsubscribe(&self, pair: CurrencyPair) -> Result<(), BitstampError> {
        self.request(|reply| WebSocketCommand::Unsubscribe { pair, reply })
            .await
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), BitstampError>>) -> WebSocketCommand,
    ) -> Result<(), BitstampError> {
        let command_tx = self.command_tx.as_ref().ok_or(BitstampError::NotStarted)?;

        if self.state() == ConnectionState::Failed {
            return Err(BitstampError::NotConnected);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let deadline = self.config.command_timeout;

        tokio::time::timeout(deadline, async {
            command_tx
                .send(build(reply_tx))
                .await
                .map_err(|_| BitstampError::ChannelClosed)?;
            reply_rx.await.map_err(|_| BitstampError::ChannelClosed)?
        })
        .await
        .map_err(|_| BitstampError::Timeout(deadline))?
    }

    fn set_state(
        state_tx: &watch::Sender<ConnectionState>,
        update_tx: &broadcast::Sender<BitstampUpdate>,
        state: ConnectionState,
        error: Option<String>,
    ) {
        let previous = state_tx.send_replace(state);
        if previous != state {
            info!("[Bitstamp WS] {:?} -> {:?}", previous, state);
        }
        let _ = update_tx.send(BitstampUpdate::ConnectionState { state, error });
    }

    /// Main connection loop with reconnection logic
    async fn connection_loop(
        config: BitstampWebSocketConfig,
        update_tx: broadcast::Sender<BitstampUpdate>,
        mut command_rx: mpsc::Receiver<WebSocketCommand>,
        channels: Arc<RwLock<HashSet<CurrencyPair>>>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
    ) {
        let mut reconnect_attempts = 0u32;

        loop {
            Self::set_state(&state_tx, &update_tx, ConnectionState::Connecting, None);
            info!("[Bitstamp WS] Connecting to {}", config.url);

            match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
                .await
            {
                Ok(Ok((ws_stream, _))) => {
                    reconnect_attempts = 0;
                    Self::set_state(&state_tx, &update_tx, ConnectionState::Connected, None);

                    let (mut write, mut read) = ws_stream.split();

                    // Re-subscribe to any active channels (on reconnect)
                    let active: Vec<CurrencyPair> = channels.read().await.iter().copied().collect();
                    let mut healthy = true;
                    for pair in active {
                        if let Err(e) = Self::send_command(&mut write, &BitstampCommand::subscribe(pair)).await {
                            warn!("[Bitstamp WS] Failed to re-subscribe {}: {}", pair, e);
                            healthy = false;
                            break;
                        }
                        debug!("[Bitstamp WS] Re-subscribed {}", pair);
                    }

                    while healthy {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        healthy = Self::handle_message(&text, &update_tx);
                                    }
                                    Some(Ok(Message::Ping(data))) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            warn!("[Bitstamp WS] Failed to send pong: {}", e);
                                            healthy = false;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        info!("[Bitstamp WS] Connection closed by server");
                                        healthy = false;
                                    }
                                    Some(Err(e)) => {
                                        error!("[Bitstamp WS] Error: {}", e);
                                        healthy = false;
                                    }
                                    None => {
                                        info!("[Bitstamp WS] Stream ended");
                                        healthy = false;
                                    }
                                    _ => {}
                                }
                            }

                            cmd = command_rx.recv() => {
                                match cmd {
                                    Some(cmd) => {
                                        healthy = Self::execute(cmd, &mut write, &channels).await;
                                    }
                                    None => {
                                        info!("[Bitstamp WS] Command channel closed, exiting");
                                        let _ = write.close().await;
                                        Self::set_state(&state_tx, &update_tx, ConnectionState::Disconnected, None);
                                        return;
                                    }
                                }
                            }
                        }
                    }

                    Self::set_state(&state_tx, &update_tx, ConnectionState::Disconnected, None);
                }
                Ok(Err(e)) => {
                    error!("[Bitstamp WS] Connection failed: {}", e);
                    Self::set_state(
                        &state_tx,
                        &update_tx,
                        ConnectionState::Disconnected,
                        Some(e.to_string()),
                    );
                }
                Err(_) => {
                    error!(
                        "[Bitstamp WS] Connection attempt timed out after {:?}",
                        config.connect_timeout
                    );
                    Self::set_state(
                        &state_tx,
                        &update_tx,
                        ConnectionState::Disconnected,
                        Some("connect timed out".to_string()),
                    );
                }
            }

            // Reconnection logic
            reconnect_attempts += 1;
            if !config.auto_reconnect || reconnect_attempts > config.max_reconnect_attempts {
                error!("[Bitstamp WS] Giving up on upstream connection");
                Self::set_state(&state_tx, &update_tx, ConnectionState::Failed, None);
                while let Some(cmd) = command_rx.recv().await {
                    cmd.reject(BitstampError::NotConnected);
                }
                return;
            }

            let delay = RECONNECT_DELAY_BASE * 2u32.pow(reconnect_attempts - 1);
            info!(
                "[Bitstamp WS] Reconnecting in {:?} (attempt {})",
                delay, reconnect_attempts
            );

            // Commands issued while we wait fail fast instead of queueing
            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    cmd = command_rx.recv() => match cmd {
                        Some(cmd) => cmd.reject(BitstampError::NotConnected),
                        None => return,
                    },
                }
            }
        }
    }

    /// Write one command to the socket and report back to the caller
    ///
    /// Returns whether the session is still usable.
    async fn execute<S>(
        cmd: WebSocketCommand,
        write: &mut S,
        channels: &RwLock<HashSet<CurrencyPair>>,
    ) -> bool
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        match cmd {
            WebSocketCommand::Subscribe { pair, reply } => {
                // The caller gave up (timed out) and committed nothing
                if reply.is_closed() {
                    debug!("[Bitstamp WS] Dropping abandoned subscribe for {}", pair);
                    return true;
                }
                match Self::send_command(write, &BitstampCommand::subscribe(pair)).await {
                    Ok(()) => {
                        if reply.send(Ok(())).is_err() {
                            warn!("[Bitstamp WS] Subscribe for {} abandoned mid-flight, releasing", pair);
                            return Self::send_command(write, &BitstampCommand::unsubscribe(pair))
                                .await
                                .is_ok();
                        }
                        channels.write().await.insert(pair);
                        info!("[Bitstamp WS] Subscribed to {}", pair);
                        true
                    }
                    Err(e) => {
                        warn!("[Bitstamp WS] Failed to subscribe {}: {}", pair, e);
                        let _ = reply.send(Err(e));
                        false
                    }
                }
            }
            WebSocketCommand::Unsubscribe { pair, reply } => {
                // Nobody wants this channel any more, so it is not replayed on
                // reconnect even if the frame never made it out.
                channels.write().await.remove(&pair);
                match Self::send_command(write, &BitstampCommand::unsubscribe(pair)).await {
                    Ok(()) => {
                        info!("[Bitstamp WS] Unsubscribed from {}", pair);
                        let _ = reply.send(Ok(()));
                        true
                    }
                    Err(e) => {
                        warn!("[Bitstamp WS] Failed to unsubscribe {}: {}", pair, e);
                        let _ = reply.send(Err(e));
                        false
                    }
                }
            }
        }
    }

    async fn send_command<S>(write: &mut S, command: &BitstampCommand) -> Result<(), BitstampError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let json =
            serde_json::to_string(command).map_err(|e| BitstampError::Send(e.to_string()))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| BitstampError::Send(e.to_string()))
    }

    /// Handle an incoming text frame
    ///
    /// Returns `false` when the session should be torn down and re-established.
    fn handle_message(text: &str, update_tx: &broadcast::Sender<BitstampUpdate>) -> bool {
        match parse_message(text) {
            Ok(FeedMessage::Trade { pair, trade }) => {
                debug!("[Bitstamp WS] Trade on {}: {}", pair, trade.price);
                let _ = update_tx.send(BitstampUpdate::Trade { pair, trade });
            }
            Ok(FeedMessage::SubscriptionSucceeded { channel }) => {
                debug!("[Bitstamp WS] Subscription confirmed: {}", channel);
            }
            Ok(FeedMessage::UnsubscriptionSucceeded { channel }) => {
                debug!("[Bitstamp WS] Unsubscription confirmed: {}", channel);
            }
            Ok(FeedMessage::RequestReconnect) => {
                info!("[Bitstamp WS] Server requested reconnect");
                return false;
            }
            Ok(FeedMessage::Error { message }) => {
                error!("[Bitstamp WS] Error from server: {}", message);
            }
            Ok(FeedMessage::Ignored { event }) => {
                debug!("[Bitstamp WS] Ignoring event: {}", event);
            }
            Err(e) => {
                debug!("[Bitstamp WS] Failed to parse message: {} ({})", text, e);
            }
        }
        true
    }
}

impl std::fmt::Debug for BitstampWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstampWebSocket")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
