//! Streaming WebSocket route
//!
//! Upgrades `/streaming` and hands the socket to the gateway, translating
//! between axum and tungstenite frames.

use std::io;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tracing::debug;

use crate::AppState;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/streaming", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    debug!("Streaming upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    let sink = sender
        .sink_map_err(|e| tungstenite::Error::Io(io::Error::other(e)))
        .with(|msg: tungstenite::Message| future::ready(Ok::<_, tungstenite::Error>(to_axum(msg))));

    let stream = receiver.map(|frame| {
        frame
            .map(to_tungstenite)
            .map_err(|e| tungstenite::Error::Io(io::Error::other(e)))
    });

    state.gateway.handle_connection(sink, stream).await;
}

fn to_tungstenite(msg: Message) -> tungstenite::Message {
    match msg {
        Message::Text(text) => tungstenite::Message::Text(text.to_string().into()),
        Message::Binary(data) => tungstenite::Message::Binary(data),
        Message::Ping(data) => tungstenite::Message::Ping(data),
        Message::Pong(data) => tungstenite::Message::Pong(data),
        Message::Close(_) => tungstenite::Message::Close(None),
    }
}

fn to_axum(msg: tungstenite::Message) -> Message {
    match msg {
        tungstenite::Message::Text(text) => Message::Text(text.to_string().into()),
        tungstenite::Message::Binary(data) => Message::Binary(data),
        tungstenite::Message::Ping(data) => Message::Ping(data),
        tungstenite::Message::Pong(data) => Message::Pong(data),
        tungstenite::Message::Close(_) => Message::Close(None),
        // The gateway never writes raw frames
        tungstenite::Message::Frame(_) => Message::Binary(Bytes::new()),
    }
}
