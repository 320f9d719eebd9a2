//! Connection struct definition
//!
//! Represents a live transport connection with its bound identity,
//! joined channels and outbound message channel.

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{ChannelId, ConnectionId, UserId};

/// Who a connection speaks for
///
/// Bound once at join time, immutable afterwards for that connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
        }
    }
}

/// Connected client information
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Bound identity (None before the first join)
    pub identity: Option<Identity>,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
    /// Shared room and private channels this connection has joined
    pub channels: HashSet<ChannelId>,
}

impl Connection {
    /// Create a new unbound connection with the given ID and sender channel
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            identity: None,
            sender,
            channels: HashSet::new(),
        }
    }

    /// Queue a message for this connection without waiting
    ///
    /// Fails if the outbox is full (client not reading) or closed
    /// (client disconnected).
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this connection
    ///
    /// Returns the bound display name if any, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.display_name.as_str())
            .unwrap_or("Unknown")
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.identity.as_ref().map(|i| &i.user_id)
    }

    /// Check if this connection has a bound identity
    pub fn is_bound(&self) -> bool {
        self.identity.is_some()
    }

    pub fn has_joined(&self, channel: &ChannelId) -> bool {
        self.channels.contains(channel)
    }
}
