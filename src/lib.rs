//! Realtime WebSocket Chat Relay Library
//!
//! Fans out messages between connected clients in a shared room and in
//! private one-to-one channels, tracks presence and typing state, and hands
//! every accepted message to a durable store without delaying live delivery.
//!
//! # Features
//! - Shared room with presence snapshots and join/leave notices
//! - Private two-party channels with deterministic channel ids
//! - Typing indicators with automatic expiry
//! - Read receipts with monotonic per-user cursors
//! - Asynchronous persistence decoupled from live fan-out
//! - History replay over the socket
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning all realtime state
//! - Each connection has a `handler` task communicating with the server
//! - `PersistenceBridge` runs the durable path on its own writer task
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_relay::{handle_connection, ChatServer, MemoryStore, PersistenceBridge, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
//!
//!     let bridge = PersistenceBridge::spawn(Arc::new(MemoryStore::new()), config.room_history_limit);
//!     tokio::spawn(ChatServer::new(cmd_rx, bridge, &config).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod persistence;
pub mod presence;
pub mod receipts;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;
pub mod typing;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use connection::{Connection, Identity};
pub use error::{AppError, ConfigError, SendError, StoreError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use persistence::{MemoryStore, Message, MessageStore, PersistenceBridge};
pub use presence::PresenceTracker;
pub use receipts::{DeliveryStatus, ReadReceiptTracker};
pub use registry::SessionRegistry;
pub use router::MessageRouter;
pub use server::{ChatServer, ServerCommand};
pub use types::{ChannelId, ConnectionId, DeliveryId, UserId};
pub use typing::TypingCoordinator;
