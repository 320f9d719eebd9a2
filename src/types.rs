//! Basic type definitions for the chat relay
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based live connection identifier
//! - `UserId`: stable user identifier supplied by the client
//! - `ChannelId`: the shared room or a private two-party channel
//! - `DeliveryId`: idempotency token reconciling live and durable copies

use std::fmt;

use uuid::Uuid;

/// Wire identifier of the shared room
pub const SHARED_ROOM_ID: &str = "group";

/// Separator between the two participant ids of a private channel
const PRIVATE_SEPARATOR: char = '_';

/// Unique live connection identifier (newtype pattern)
///
/// Wraps a UUID v4. Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fan-out target of a message
///
/// Serialized as a plain string: `"group"` for the shared room, otherwise the
/// private channel id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    /// The single well-known multi-party room
    Room,
    /// Two-party channel, `<lower>_<higher>` of the participant ids
    Private(String),
}

impl ChannelId {
    /// Derive the private channel id for an unordered pair of users.
    ///
    /// Commutative: both participants compute the same id without a lookup.
    pub fn private_between(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self::Private(format!("{}{}{}", low, PRIVATE_SEPARATOR, high))
    }

    /// Parse a wire channel id
    ///
    /// Returns None for an empty or blank id.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw == SHARED_ROOM_ID {
            Some(Self::Room)
        } else {
            Some(Self::Private(raw.to_string()))
        }
    }

    pub fn is_room(&self) -> bool {
        matches!(self, Self::Room)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Room => SHARED_ROOM_ID,
            Self::Private(id) => id,
        }
    }

    /// Check whether `user` is one of the two participants of this channel.
    ///
    /// User ids may themselves contain the separator, so both split
    /// positions are tried against the canonical ordering.
    pub fn involves(&self, user: &UserId) -> bool {
        let Self::Private(id) = self else {
            return false;
        };
        let user = user.as_str();

        if let Some(rest) = id
            .strip_prefix(user)
            .and_then(|r| r.strip_prefix(PRIVATE_SEPARATOR))
        {
            if !rest.is_empty() && user <= rest {
                return true;
            }
        }

        if let Some(rest) = id
            .strip_suffix(user)
            .and_then(|r| r.strip_suffix(PRIVATE_SEPARATOR))
        {
            if !rest.is_empty() && rest <= user {
                return true;
            }
        }

        false
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        match id {
            ChannelId::Room => SHARED_ROOM_ID.to_string(),
            ChannelId::Private(id) => id,
        }
    }
}

impl TryFrom<String> for ChannelId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| "channel id must not be empty".to_string())
    }
}

impl serde::Serialize for ChannelId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for ChannelId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Idempotency token shared by the live broadcast and the durable copy
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Create a new server-assigned delivery ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use the client token if it is present and non-blank, otherwise generate one
    pub fn from_client(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Self(token),
            _ => Self::generate(),
        }
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
