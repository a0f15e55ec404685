//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake (capturing
//! the `Origin` header for TURN credential vending), frame parsing, and
//! bidirectional communication with the SignalServer.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::message::{Ack, ClientEvent, Frame, ServerMessage};
use crate::server::SignalServer;
use crate::types::ClientId;

/// Outbound messages buffered per connection
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection, processes
/// its events in order, and cleans up its room membership when it ends.
pub async fn handle_connection(
    stream: TcpStream,
    server: Arc<SignalServer>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let mut origin: Option<String> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            origin = request
                .headers()
                .get(ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Ok(response)
        },
    )
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = ClientId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // Channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER_SIZE);

    // Spawn write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for client");

        let _ = ws_sender.close().await;
    });

    // Register and greet with STUN/TURN servers
    server
        .connect(client_id, msg_tx.clone(), origin.as_deref())
        .await;

    // Spawn read task (WebSocket -> SignalServer). Events of one connection
    // are handled one at a time, in arrival order. A stop request is only
    // seen between events, never in the middle of one.
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let read_server = Arc::clone(&server);
    let mut read_task = tokio::spawn(async move {
        loop {
            let msg_result = tokio::select! {
                _ = &mut stop_rx => break,
                next = ws_receiver.next() => match next {
                    Some(msg_result) => msg_result,
                    None => break,
                },
            };
            match msg_result {
                Ok(Message::Text(text)) => {
                    let frame = match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("Ignoring malformed frame from {}: {}", client_id, e);
                            continue;
                        }
                    };
                    let ack = Ack::new(frame.ack, &msg_tx);
                    match ClientEvent::parse(frame) {
                        Some(event) => read_server.handle_event(client_id, event, ack).await,
                        None => debug!("Ignoring unusable event from {}", client_id),
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", client_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // Wait for either task to complete. Disconnect cleanup must not overlap
    // an event still being handled, so the read task is always finished first.
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", client_id);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", client_id);
            let _ = stop_tx.send(());
            if let Err(e) = read_task.await {
                error!("Read task for {} failed: {}", client_id, e);
            }
        }
    }

    // Leave the room and drop the registry's sender, which ends the write task
    server.disconnect(client_id).await;

    Ok(())
}
