mod config;
mod connection;
mod protocol;

use crate::config::Config;
use crate::connection::Connection;
use crate::protocol::{ClientMessage, ServerMessage};
use anyhow::Context;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use panel_service::runtime::PanelFactory;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Handles WebSocket upgrade requests.
async fn ws_handler(ws: WebSocketUpgrade, State(factory): State<PanelFactory>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, factory))
}

/// Manages an individual WebSocket connection.
///
/// A writer task owns the sending half and serializes everything queued on the
/// outbound channel: panel commands as they are emitted, plus a session snapshot
/// after every accepted client message. The read loop applies client messages
/// in order.
async fn handle_socket(socket: WebSocket, factory: PanelFactory) {
    info!("WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(128);
    let (command_tx, mut command_rx) = mpsc::channel(128);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                // Client disconnected.
                break;
            }
        }
    });

    let command_outbound = outbound_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if command_outbound
                .send(ServerMessage::Command { command })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    if outbound_tx.send(ServerMessage::roster()).await.is_err() {
        tracing::warn!("Client went away before the roster was sent");
    }

    let mut connection = Connection::new(factory, command_tx, outbound_tx.clone());
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    tracing::debug!("Received message: {:?}", message);
                    connection.handle(message).await;
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed client message: {}", e);
                    let _ = outbound_tx
                        .send(ServerMessage::Error {
                            message: format!("malformed message: {e}"),
                        })
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                // Client disconnected.
                info!("WebSocket error: {}", e);
                break;
            }
        }
    }

    connection.close().await;
    drop(connection);
    drop(outbound_tx);
    forwarder.abort();
    writer.abort();
    info!("WebSocket connection closed");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.panel.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let factory = PanelFactory::from_config(config.panel.clone())?;

    // Configure a permissive CORS policy to allow connections from any origin.
    // This is necessary for a separate frontend to connect to the WebSocket API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(factory);

    info!("Starting WebSocket server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
