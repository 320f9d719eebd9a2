//! Error types for the chat relay
//!
//! Defines application-level errors, storage errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// validation errors (reported to the originating client only).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Command referenced a connection the registry does not know
    #[error("Unknown connection")]
    UnknownConnection,

    /// Connection tried to rebind to a different identity
    #[error("Connection is already bound to '{bound}'")]
    IdentityConflict { bound: String },

    /// Operation needs a bound identity
    #[error("Identity required")]
    IdentityRequired,

    /// Client is not joined to the shared room
    #[error("Not in room")]
    NotInRoom,

    /// Client is not joined to the given channel
    #[error("Not in channel: {0}")]
    NotInChannel(String),

    /// Channel id is malformed or does not involve the acting user
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Payload sender does not match the bound identity
    #[error("Sender does not match connection identity")]
    SenderMismatch,

    /// Empty or whitespace-only message text
    #[error("Empty message")]
    EmptyMessage,

    /// Durable store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durable store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unreachable or timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the write or query
    #[error("Store rejected request: {0}")]
    Rejected(String),
}

/// Message send errors
///
/// Occurs when a connection's outbox cannot take another message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The client is not draining its outbox
    #[error("Outbox full")]
    Full,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable holds a value that does not parse
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}
