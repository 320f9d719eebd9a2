//! Message protocol definitions
//!
//! JSON-based bidirectional event protocol. Every frame is
//! `{"event": "<name>", "data": <payload>}`, modelled with Serde's adjacently
//! tagged enums so each event has a fixed payload schema. Frames that do not
//! match a schema fail to decode and are dropped by the connection handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::persistence::Message;
use crate::types::{ChannelId, DeliveryId};

/// Client → Server event
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the shared room
    JoinRoom(JoinRoomPayload),
    /// Leave the shared room without disconnecting
    LeaveRoom,
    /// Send a message to the shared room
    ChatMessage(ChatMessagePayload),
    /// Typing started or refreshed
    Typing(TypingPayload),
    /// Typing stopped
    StopTyping(TypingPayload),
    /// Join a private two-party channel
    JoinPrivateRoom(JoinPrivateRoomPayload),
    /// Leave a private channel
    LeavePrivateRoom(ChannelRef),
    /// Send a message to a private channel
    PrivateMessage(PrivateMessagePayload),
    /// Acknowledge reading a private channel
    MarkRead(ReadReceipt),
    /// Request durable history of a channel
    FetchHistory(HistoryRequest),
}

/// Server → Client event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Transport accepted, connection id issued
    Connected(ConnectedPayload),
    /// Full snapshot of shared-room presence
    MembersList(Vec<String>),
    /// Someone joined or left the shared room
    RoomNotice(RoomNotice),
    /// Shared-room message, echoed to every member including the sender
    ChatMessage(ChatMessagePayload),
    /// Another member started typing
    Typing(TypingNotice),
    /// Another member's typing indicator ended
    StopTyping(TypingNotice),
    /// Private-channel message
    PrivateMessage(PrivateMessageOut),
    /// The other participant read the channel
    MessagesRead(ReadReceipt),
    /// Reply to `fetchHistory`
    History(HistoryPayload),
    /// Error reported to the originating client only
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub connection_id: String,
}

/// `joinRoom` payload, either a bare username string or an object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "JoinRoomWire")]
pub struct JoinRoomPayload {
    pub username: String,
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinRoomWire {
    Bare(String),
    #[serde(rename_all = "camelCase")]
    Full {
        username: String,
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl From<JoinRoomWire> for JoinRoomPayload {
    fn from(wire: JoinRoomWire) -> Self {
        match wire {
            JoinRoomWire::Bare(username) => Self {
                username,
                user_id: None,
            },
            JoinRoomWire::Full { username, user_id } => Self { username, user_id },
        }
    }
}

/// Shared-room message body, used in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub username: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomNotice {
    pub username: String,
    pub action: PresenceAction,
}

/// Client typing signal; an absent `chatId` means the shared room
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPrivateRoomPayload {
    pub chat_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageOut {
    pub chat_id: ChannelId,
    pub sender: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub delivery_id: DeliveryId,
}

/// Read acknowledgement, used in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub chat_id: String,
    pub reader_user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub chat_id: ChannelId,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Connection already bound to another identity
    IdentityConflict,
    /// Operation attempted before binding an identity
    IdentityRequired,
    /// Shared-room operation without joining the room
    NotInRoom,
    /// Channel operation without joining the channel
    NotInChannel,
    /// Malformed channel id or one the user is not part of
    InvalidChannel,
    /// Payload sender differs from the bound identity
    SenderMismatch,
    /// History could not be loaded
    HistoryUnavailable,
    /// Invalid message format
    InvalidMessage,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::IdentityConflict { .. } => ErrorCode::IdentityConflict,
            AppError::IdentityRequired => ErrorCode::IdentityRequired,
            AppError::NotInRoom => ErrorCode::NotInRoom,
            AppError::NotInChannel(_) => ErrorCode::NotInChannel,
            AppError::InvalidChannel(_) => ErrorCode::InvalidChannel,
            AppError::SenderMismatch => ErrorCode::SenderMismatch,
            AppError::Store(_) => ErrorCode::HistoryUnavailable,
            _ => ErrorCode::InvalidMessage,
        };
        let message = match &err {
            // Fatal errors are not typically converted (connection closes)
            AppError::WebSocket(_) | AppError::Io(_) | AppError::ChannelSend => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        ServerMessage::Error(ErrorPayload { code, message })
    }
}
