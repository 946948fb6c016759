//! WebSocket handlers
//!
//! `/ws` feeds the connection registry: clients subscribe to channels and
//! receive trade/position/status broadcasts, and can drive the bot with
//! `hft_command` frames. `/ws/analysis/:symbol` attaches to the per-symbol
//! analysis session.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Inbound client frame
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    HftCommand { command: HftCommand },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HftCommand {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    client_id: Option<String>,
}

/// Registry websocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let client_id = params.client_id.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.registry.connect(&client_id, tx, &[]);

    // Writer task: drains the registry channel into the socket. When it
    // stops, the registry notices on the next send and cleans up.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_frame(&state, &client_id, &text),
            Ok(Message::Close(_)) => {
                info!("WebSocket client {} requested close", client_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    state.registry.disconnect(&client_id, connection_id);
    send_task.abort();
}

/// Dispatch one inbound text frame. Malformed JSON and unknown types are
/// logged and dropped; the connection stays open.
fn handle_frame(state: &AppState, client_id: &str, text: &str) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Subscribe { channels }) => {
            debug!("Client {} subscribing to {:?}", client_id, channels);
            state.registry.subscribe(client_id, &channels);
        }
        Ok(InboundMessage::Unsubscribe { channels }) => {
            debug!("Client {} unsubscribing from {:?}", client_id, channels);
            state.registry.unsubscribe(client_id, &channels);
        }
        Ok(InboundMessage::HftCommand { command }) => match command {
            HftCommand::Start => {
                state.bot.clone().start();
            }
            HftCommand::Stop => state.bot.stop(),
        },
        Ok(InboundMessage::Unknown) => {
            debug!("Ignoring unrecognized message type from {}", client_id);
        }
        Err(e) => warn!("Malformed frame from {}: {}", client_id, e),
    }
}

/// Analysis websocket upgrade handler
pub async fn analysis_ws_handler(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_analysis_socket(socket, state, symbol))
}

async fn handle_analysis_socket(socket: WebSocket, state: Arc<AppState>, symbol: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.analysis.connect(&symbol, tx);
    info!("Analysis subscriber {} joined {}", connection_id, symbol);

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames on this endpoint are drained and ignored.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Analysis socket error for {}: {}", symbol, e);
                break;
            }
        }
    }

    state.analysis.disconnect(&symbol, connection_id);
    send_task.abort();
    info!("Analysis subscriber {} left {}", connection_id, symbol);
}
