//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! event decoding, and bidirectional communication with the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ConnectedPayload, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ConnectionId;

/// Outbox size per connection
const OUTBOX_BUFFER_SIZE: usize = 64;

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle. The ChatServer hears exactly one
/// `Disconnect` for every accepted connection.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = ConnectionId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // Channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOX_BUFFER_SIZE);

    // Greeting goes out before the server can queue anything
    let connected_msg = ServerMessage::Connected(ConnectedPayload {
        connection_id: client_id.to_string(),
    });
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    if cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let cmd_tx_read = cmd_tx.clone();

    // Read task (WebSocket -> ServerCommand)
    let read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                // Pings are answered by tungstenite; binary frames carry no events
                Ok(_) => continue,
                Err(e) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            };

            let Some(cmd) = decode_event(client_id, &text) else {
                continue;
            };
            if cmd_tx_read.send(cmd).await.is_err() {
                debug!("Server closed, ending read task for {}", client_id);
                break;
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // Write task (ServerMessage -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for {}", client_id);

        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", client_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", client_id);
        }
    }

    let _ = cmd_tx.send(ServerCommand::Disconnect { client_id }).await;

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Decode one text frame; malformed events are logged and dropped
fn decode_event(client_id: ConnectionId, text: &str) -> Option<ServerCommand> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(event) => Some(client_message_to_command(client_id, event)),
        Err(e) => {
            warn!("Dropping malformed event from {}: {}", client_id, e);
            None
        }
    }
}

/// Convert a decoded client event to a ServerCommand
pub fn client_message_to_command(client_id: ConnectionId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::JoinRoom(p) => ServerCommand::JoinRoom {
            client_id,
            username: p.username,
            user_id: p.user_id,
        },
        ClientMessage::LeaveRoom => ServerCommand::LeaveRoom { client_id },
        ClientMessage::ChatMessage(p) => ServerCommand::ChatMessage {
            client_id,
            message: p.message,
            delivery_id: p.delivery_id,
        },
        ClientMessage::Typing(p) => ServerCommand::Typing {
            client_id,
            chat_id: p.chat_id,
        },
        ClientMessage::StopTyping(p) => ServerCommand::StopTyping {
            client_id,
            chat_id: p.chat_id,
        },
        ClientMessage::JoinPrivateRoom(p) => ServerCommand::JoinPrivateRoom {
            client_id,
            chat_id: p.chat_id,
            user_id: p.user_id,
            username: p.username,
        },
        ClientMessage::LeavePrivateRoom(p) => ServerCommand::LeavePrivateRoom {
            client_id,
            chat_id: p.chat_id,
        },
        ClientMessage::PrivateMessage(p) => ServerCommand::PrivateMessage {
            client_id,
            chat_id: p.chat_id,
            sender_id: p.sender_id,
            text: p.text,
            members: p.members,
            delivery_id: p.delivery_id,
        },
        ClientMessage::MarkRead(p) => ServerCommand::MarkRead {
            client_id,
            chat_id: p.chat_id,
            reader_user_id: p.reader_user_id,
        },
        ClientMessage::FetchHistory(p) => ServerCommand::FetchHistory {
            client_id,
            chat_id: p.chat_id,
            limit: p.limit,
        },
    }
}
