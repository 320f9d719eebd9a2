//! Message router
//!
//! Validates an outbound message, resolves its fan-out target, broadcasts it
//! to every connection joined to that target and then hands it to the
//! persistence bridge. Broadcast never waits on storage.

use chrono::Utc;
use tracing::debug;

use crate::error::AppError;
use crate::message::{ChatMessagePayload, PrivateMessageOut, ServerMessage};
use crate::persistence::{Message, PersistenceBridge};
use crate::registry::SessionRegistry;
use crate::types::{ChannelId, ConnectionId, DeliveryId, UserId};

/// A message as submitted by a client, before validation
#[derive(Debug, Clone)]
pub enum Draft {
    /// Shared-room message
    Room {
        text: String,
        delivery_id: Option<String>,
    },
    /// Private-channel message
    Private {
        chat_id: String,
        sender_id: String,
        text: String,
        members: Vec<String>,
        delivery_id: Option<String>,
    },
}

impl Draft {
    fn text(&self) -> &str {
        match self {
            Draft::Room { text, .. } | Draft::Private { text, .. } => text,
        }
    }
}

pub struct MessageRouter {
    bridge: PersistenceBridge,
}

impl MessageRouter {
    pub fn new(bridge: PersistenceBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &PersistenceBridge {
        &self.bridge
    }

    /// Accept, fan out and persist one message from `origin`
    ///
    /// Within a channel, broadcast order is the order of `publish` calls.
    pub fn publish(
        &self,
        registry: &SessionRegistry,
        origin: ConnectionId,
        draft: Draft,
    ) -> Result<Message, AppError> {
        if draft.text().trim().is_empty() {
            return Err(AppError::EmptyMessage);
        }

        let conn = registry.get(origin).ok_or(AppError::UnknownConnection)?;
        let identity = conn.identity.as_ref().ok_or(AppError::IdentityRequired)?;

        let (message, members) = match draft {
            Draft::Room { text, delivery_id } => {
                if !conn.has_joined(&ChannelId::Room) {
                    return Err(AppError::NotInRoom);
                }
                let message = Message {
                    channel_id: ChannelId::Room,
                    sender_id: identity.user_id.to_string(),
                    sender_name: identity.display_name.clone(),
                    text,
                    sent_at: Utc::now(),
                    delivery_id: DeliveryId::from_client(delivery_id),
                };
                // The room summary tracks no participant list
                (message, Vec::new())
            }
            Draft::Private {
                chat_id,
                sender_id,
                text,
                members,
                delivery_id,
            } => {
                if sender_id != identity.user_id.as_str() {
                    return Err(AppError::SenderMismatch);
                }
                let channel = resolve_private(&chat_id, &identity.user_id, &members)?;
                let members = if members.is_empty() {
                    vec![identity.user_id.clone()]
                } else {
                    members.into_iter().map(UserId::new).collect()
                };
                let message = Message {
                    channel_id: channel,
                    sender_id,
                    sender_name: identity.display_name.clone(),
                    text,
                    sent_at: Utc::now(),
                    delivery_id: DeliveryId::from_client(delivery_id),
                };
                (message, members)
            }
        };

        let event = live_event(&message);
        let delivered = registry.broadcast(&message.channel_id, &event, |_| true);
        debug!(
            "Message {} from {} fanned out to {} connection(s) in {}",
            message.delivery_id, message.sender_id, delivered, message.channel_id
        );

        self.bridge.append(message.clone(), members);
        Ok(message)
    }
}

/// Check a private channel id against the sender and optional member list
fn resolve_private(chat_id: &str, sender: &UserId, members: &[String]) -> Result<ChannelId, AppError> {
    let channel = match ChannelId::parse(chat_id) {
        Some(channel @ ChannelId::Private(_)) => channel,
        _ => return Err(AppError::InvalidChannel(chat_id.to_string())),
    };

    if !channel.involves(sender) {
        return Err(AppError::InvalidChannel(chat_id.to_string()));
    }

    if !members.is_empty() {
        let [a, b] = members else {
            return Err(AppError::InvalidChannel(chat_id.to_string()));
        };
        let derived = ChannelId::private_between(&UserId::new(a.as_str()), &UserId::new(b.as_str()));
        if derived != channel {
            return Err(AppError::InvalidChannel(chat_id.to_string()));
        }
    }

    Ok(channel)
}

/// Live wire shape of an accepted message
fn live_event(message: &Message) -> ServerMessage {
    match &message.channel_id {
        ChannelId::Room => ServerMessage::ChatMessage(ChatMessagePayload {
            username: message.sender_name.clone(),
            message: message.text.clone(),
            delivery_id: Some(message.delivery_id.to_string()),
        }),
        ChannelId::Private(_) => ServerMessage::PrivateMessage(PrivateMessageOut {
            chat_id: message.channel_id.clone(),
            sender: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
            timestamp: message.sent_at,
            delivery_id: message.delivery_id.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Identity;
    use crate::persistence::MemoryStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn test_resolve_private_checks_membership() {
        let u1 = UserId::new("u1");

        assert_eq!(
            resolve_private("u1_u2", &u1, &[]).unwrap(),
            ChannelId::Private("u1_u2".to_string())
        );
        assert!(resolve_private("u1_u2", &u1, &["u2".to_string(), "u1".to_string()]).is_ok());

        assert!(resolve_private("group", &u1, &[]).is_err());
        assert!(resolve_private("u2_u3", &u1, &[]).is_err());
        assert!(resolve_private("u1_u2", &u1, &["u1".to_string(), "u3".to_string()]).is_err());
        assert!(resolve_private("u1_u2", &u1, &["u1".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_publish_rejects_without_fanout() {
        let store = Arc::new(MemoryStore::new());
        let router = MessageRouter::new(PersistenceBridge::spawn(store.clone(), 50));
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(16);
        let id = ConnectionId::new();
        registry.connect(id, tx);

        let room = |text: &str| Draft::Room {
            text: text.to_string(),
            delivery_id: None,
        };

        // No identity yet
        let err = router.publish(&registry, id, room("hi")).unwrap_err();
        assert!(matches!(err, AppError::IdentityRequired));

        registry.bind(id, Identity::new("u1", "alice")).unwrap();
        let err = router.publish(&registry, id, room("hi")).unwrap_err();
        assert!(matches!(err, AppError::NotInRoom));

        registry.join(id, ChannelId::Room);
        let err = router.publish(&registry, id, room("   ")).unwrap_err();
        assert!(matches!(err, AppError::EmptyMessage));

        assert!(rx.try_recv().is_err());
        router.bridge().flush().await;
        assert_eq!(store.message_count(&ChannelId::Room).await, 0);
    }

    #[tokio::test]
    async fn test_publish_private_echoes_to_sender_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let router = MessageRouter::new(PersistenceBridge::spawn(store.clone(), 50));
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(16);
        let id = ConnectionId::new();
        let chat = ChannelId::Private("u1_u2".to_string());
        registry.connect(id, tx);
        registry.bind(id, Identity::new("u1", "alice")).unwrap();
        registry.join(id, chat.clone());

        let message = router
            .publish(
                &registry,
                id,
                Draft::Private {
                    chat_id: "u1_u2".to_string(),
                    sender_id: "u1".to_string(),
                    text: "hello".to_string(),
                    members: vec!["u1".to_string(), "u2".to_string()],
                    delivery_id: Some("tmp-7".to_string()),
                },
            )
            .unwrap();

        assert_eq!(message.delivery_id, DeliveryId("tmp-7".to_string()));
        match rx.try_recv().unwrap() {
            ServerMessage::PrivateMessage(out) => {
                assert_eq!(out.sender, "u1");
                assert_eq!(out.sender_name, "alice");
                assert_eq!(out.text, "hello");
                assert_eq!(out.delivery_id, message.delivery_id);
            }
            other => panic!("unexpected event {:?}", other),
        }

        router.bridge().flush().await;
        let summary = store.summary(&chat).await.unwrap();
        assert_eq!(summary.members, vec!["u1", "u2"]);
        assert_eq!(summary.last_message, "hello");
    }

    #[tokio::test]
    async fn test_publish_private_sender_mismatch() {
        let router = MessageRouter::new(PersistenceBridge::spawn(Arc::new(MemoryStore::new()), 50));
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = ConnectionId::new();
        registry.connect(id, tx);
        registry.bind(id, Identity::new("u1", "alice")).unwrap();

        let err = router
            .publish(
                &registry,
                id,
                Draft::Private {
                    chat_id: "u1_u2".to_string(),
                    sender_id: "u2".to_string(),
                    text: "spoofed".to_string(),
                    members: vec![],
                    delivery_id: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, AppError::SenderMismatch));
    }

    #[tokio::test]
    async fn test_room_summary_keeps_no_member_list() {
        let store = Arc::new(MemoryStore::new());
        let router = MessageRouter::new(PersistenceBridge::spawn(store.clone(), 50));
        let mut registry = SessionRegistry::new();

        for (user, text) in [("u1", "first"), ("u2", "second"), ("u3", "third")] {
            let (tx, _rx) = mpsc::channel(16);
            let id = ConnectionId::new();
            registry.connect(id, tx);
            registry.bind(id, Identity::new(user, user)).unwrap();
            registry.join(id, ChannelId::Room);
            router
                .publish(
                    &registry,
                    id,
                    Draft::Room {
                        text: text.to_string(),
                        delivery_id: None,
                    },
                )
                .unwrap();
        }

        router.bridge().flush().await;
        let summary = store.summary(&ChannelId::Room).await.unwrap();
        assert!(summary.members.is_empty());
        assert_eq!(summary.last_message, "third");
    }
}
