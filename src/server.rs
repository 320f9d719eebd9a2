//! ChatServer Actor implementation
//!
//! The central actor that owns all realtime state: sessions, shared-room
//! presence, typing indicators and read cursors. Every mutation runs on this
//! one task, in the order commands arrive, which is what gives each channel
//! its broadcast ordering without locks. Fan-out only ever queues into
//! connection outboxes, so a client that stops reading cannot stall the loop.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::Identity;
use crate::error::AppError;
use crate::message::{
    HistoryPayload, PresenceAction, ReadReceipt, RoomNotice, ServerMessage, TypingNotice,
};
use crate::persistence::PersistenceBridge;
use crate::presence::{PresenceChange, PresenceTracker};
use crate::receipts::ReadReceiptTracker;
use crate::registry::SessionRegistry;
use crate::router::{Draft, MessageRouter};
use crate::typing::{TypingCoordinator, TypingEnded};
use crate::types::{ChannelId, ConnectionId, UserId};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        client_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Transport closed
    Disconnect {
        client_id: ConnectionId,
    },
    /// Join the shared room
    JoinRoom {
        client_id: ConnectionId,
        username: String,
        user_id: Option<String>,
    },
    /// Leave the shared room
    LeaveRoom {
        client_id: ConnectionId,
    },
    /// Shared-room message
    ChatMessage {
        client_id: ConnectionId,
        message: String,
        delivery_id: Option<String>,
    },
    /// Typing started or refreshed (None = shared room)
    Typing {
        client_id: ConnectionId,
        chat_id: Option<String>,
    },
    /// Typing stopped (None = shared room)
    StopTyping {
        client_id: ConnectionId,
        chat_id: Option<String>,
    },
    /// Join a private channel
    JoinPrivateRoom {
        client_id: ConnectionId,
        chat_id: String,
        user_id: String,
        username: String,
    },
    /// Leave a private channel
    LeavePrivateRoom {
        client_id: ConnectionId,
        chat_id: String,
    },
    /// Private-channel message
    PrivateMessage {
        client_id: ConnectionId,
        chat_id: String,
        sender_id: String,
        text: String,
        members: Vec<String>,
        delivery_id: Option<String>,
    },
    /// Read acknowledgement
    MarkRead {
        client_id: ConnectionId,
        chat_id: String,
        reader_user_id: String,
    },
    /// Durable history request (None = shared room)
    FetchHistory {
        client_id: ConnectionId,
        chat_id: Option<String>,
        limit: Option<usize>,
    },
    /// Current shared-room presence snapshot
    RoomMembers {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    registry: SessionRegistry,
    presence: PresenceTracker,
    typing: TypingCoordinator,
    receipts: ReadReceiptTracker,
    router: MessageRouter,
    typing_sweep_interval: Duration,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver and durable path
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        bridge: PersistenceBridge,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            presence: PresenceTracker::new(),
            typing: TypingCoordinator::new(config.typing_timeout),
            receipts: ReadReceiptTracker::new(),
            router: MessageRouter::new(bridge),
            typing_sweep_interval: config.typing_sweep_interval,
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Processes commands until all senders are dropped, sweeping expired
    /// typing indicators in between. Pending durable writes are flushed
    /// before returning.
    pub async fn run(mut self) {
        info!("ChatServer started");

        let mut sweep = tokio::time::interval(self.typing_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
                _ = sweep.tick() => {
                    self.expire_typing();
                }
            }
        }

        info!("ChatServer shutting down");
        self.router.bridge().flush().await;
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id);
            }
            ServerCommand::JoinRoom {
                client_id,
                username,
                user_id,
            } => {
                let result = self.handle_join_room(client_id, username, user_id);
                self.report(client_id, result);
            }
            ServerCommand::LeaveRoom { client_id } => {
                let result = self.handle_leave_room(client_id);
                self.report(client_id, result);
            }
            ServerCommand::ChatMessage {
                client_id,
                message,
                delivery_id,
            } => {
                let draft = Draft::Room {
                    text: message,
                    delivery_id,
                };
                let result = self.handle_publish(client_id, draft);
                self.report(client_id, result);
            }
            ServerCommand::Typing { client_id, chat_id } => {
                let result = self.handle_typing(client_id, chat_id);
                self.report(client_id, result);
            }
            ServerCommand::StopTyping { client_id, chat_id } => {
                let result = self.handle_stop_typing(client_id, chat_id);
                self.report(client_id, result);
            }
            ServerCommand::JoinPrivateRoom {
                client_id,
                chat_id,
                user_id,
                username,
            } => {
                let result = self
                    .handle_join_private_room(client_id, chat_id, user_id, username);
                self.report(client_id, result);
            }
            ServerCommand::LeavePrivateRoom { client_id, chat_id } => {
                let result = self.handle_leave_private_room(client_id, chat_id);
                self.report(client_id, result);
            }
            ServerCommand::PrivateMessage {
                client_id,
                chat_id,
                sender_id,
                text,
                members,
                delivery_id,
            } => {
                let draft = Draft::Private {
                    chat_id,
                    sender_id,
                    text,
                    members,
                    delivery_id,
                };
                let result = self.handle_publish(client_id, draft);
                self.report(client_id, result);
            }
            ServerCommand::MarkRead {
                client_id,
                chat_id,
                reader_user_id,
            } => {
                let result = self.handle_mark_read(client_id, chat_id, reader_user_id);
                self.report(client_id, result);
            }
            ServerCommand::FetchHistory {
                client_id,
                chat_id,
                limit,
            } => {
                let result = self.handle_fetch_history(client_id, chat_id, limit);
                self.report(client_id, result);
            }
            ServerCommand::RoomMembers { reply } => {
                let _ = reply.send(self.presence.snapshot());
            }
        }
    }

    /// Tell the originating connection why its event was dropped
    ///
    /// Errors never reach other members. Empty messages and events from
    /// connections the registry no longer knows are dropped silently.
    fn report(&self, client_id: ConnectionId, result: Result<(), AppError>) {
        match result {
            Ok(()) => {}
            Err(AppError::EmptyMessage) => {
                debug!("Dropped empty message from {}", client_id);
            }
            Err(AppError::UnknownConnection) => {
                debug!("Dropped event from unknown connection {}", client_id);
            }
            Err(e) => {
                warn!("Rejected event from {}: {}", client_id, e);
                self.registry.send_to(client_id, e.into());
            }
        }
    }

    /// Handle new connection
    fn handle_connect(&mut self, client_id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected", client_id);
        self.registry.connect(client_id, sender);
        debug!(
            "Total connections: {}, Room members: {}",
            self.registry.len(),
            self.presence.len()
        );
    }

    /// Handle transport close
    ///
    /// Memberships are released immediately; in-flight durable writes are
    /// left to complete.
    fn handle_disconnect(&mut self, client_id: ConnectionId) {
        let Some(unbound) = self.registry.unbind(client_id) else {
            return;
        };
        info!("Client {} disconnected", client_id);

        if let Some(identity) = unbound.identity {
            for channel in &unbound.channels {
                self.release_channel(&identity, channel);
            }
        }

        debug!(
            "Total connections: {}, Room members: {}",
            self.registry.len(),
            self.presence.len()
        );
    }

    /// Bind identity and join the shared room
    fn handle_join_room(
        &mut self,
        client_id: ConnectionId,
        username: String,
        user_id: Option<String>,
    ) -> Result<(), AppError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::IdentityRequired);
        }

        let identity = match (self.registry.identity(client_id), user_id) {
            (_, Some(user_id)) => Identity::new(user_id, username),
            // Rejoin of an already bound connection keeps its user id
            (Some(bound), None) => Identity::new(bound.user_id.as_str(), username),
            (None, None) => Identity::new(username.clone(), username),
        };
        let identity = self.registry.bind(client_id, identity)?.clone();

        if !self.registry.join(client_id, ChannelId::Room) {
            debug!("Client {} already in room", client_id);
            return Ok(());
        }

        info!("{} is joining the room", identity.display_name);

        match self.presence.join(&identity.display_name) {
            PresenceChange::Joined => {
                self.announce_presence(&identity.display_name, PresenceAction::Joined);
            }
            _ => {
                // Name already present through another connection; the set
                // did not change, so only the newcomer needs the snapshot.
                let snapshot = ServerMessage::MembersList(self.presence.snapshot());
                self.registry.send_to(client_id, snapshot);
            }
        }

        self.replay_typing(client_id, &identity.user_id, &ChannelId::Room);
        Ok(())
    }

    /// Explicit Joined -> Unjoined transition
    fn handle_leave_room(&mut self, client_id: ConnectionId) -> Result<(), AppError> {
        let identity = self
            .registry
            .identity(client_id)
            .cloned()
            .ok_or(AppError::NotInRoom)?;

        if !self.registry.leave(client_id, &ChannelId::Room) {
            return Err(AppError::NotInRoom);
        }

        info!("{} left the room", identity.display_name);
        self.release_channel(&identity, &ChannelId::Room);
        Ok(())
    }

    /// Bind identity and join a private channel
    fn handle_join_private_room(
        &mut self,
        client_id: ConnectionId,
        chat_id: String,
        user_id: String,
        username: String,
    ) -> Result<(), AppError> {
        let channel = parse_private(&chat_id)?;
        if user_id.trim().is_empty() || username.trim().is_empty() {
            return Err(AppError::IdentityRequired);
        }
        let identity = Identity::new(user_id, username.trim());
        if !channel.involves(&identity.user_id) {
            return Err(AppError::InvalidChannel(chat_id));
        }

        let identity = self.registry.bind(client_id, identity)?.clone();

        if self.registry.join(client_id, channel.clone()) {
            info!("{} joined private room: {}", identity.display_name, channel);
            self.replay_typing(client_id, &identity.user_id, &channel);
        }
        Ok(())
    }

    fn handle_leave_private_room(
        &mut self,
        client_id: ConnectionId,
        chat_id: String,
    ) -> Result<(), AppError> {
        let channel = parse_private(&chat_id)?;
        let identity = self
            .registry
            .identity(client_id)
            .cloned()
            .ok_or(AppError::IdentityRequired)?;

        if !self.registry.leave(client_id, &channel) {
            return Err(AppError::NotInChannel(chat_id));
        }

        debug!("{} left private room: {}", identity.display_name, channel);
        self.release_channel(&identity, &channel);
        Ok(())
    }

    /// Route a message; a sender's typing indicator ends when it publishes
    fn handle_publish(&mut self, client_id: ConnectionId, draft: Draft) -> Result<(), AppError> {
        let message = self.router.publish(&self.registry, client_id, draft)?;

        let sender = UserId::new(message.sender_id.as_str());
        if let Some(ended) = self.typing.stop(&message.channel_id, &sender) {
            self.announce_typing_ended(ended);
        }
        Ok(())
    }

    fn handle_typing(&mut self, client_id: ConnectionId, chat_id: Option<String>) -> Result<(), AppError> {
        let (identity, channel) = self.member_context(client_id, chat_id)?;

        if !self
            .typing
            .signal(channel.clone(), identity.user_id.clone(), &identity.display_name, Instant::now())
        {
            return Ok(());
        }

        let notice = ServerMessage::Typing(typing_notice(&identity.display_name, &channel));
        self.registry.broadcast(&channel, &notice, |c| c.user_id() != Some(&identity.user_id));
        Ok(())
    }

    fn handle_stop_typing(&mut self, client_id: ConnectionId, chat_id: Option<String>) -> Result<(), AppError> {
        let (identity, channel) = self.member_context(client_id, chat_id)?;

        if let Some(ended) = self.typing.stop(&channel, &identity.user_id) {
            self.announce_typing_ended(ended);
        }
        Ok(())
    }

    /// Advance the reader's cursor and tell the other participant
    fn handle_mark_read(
        &mut self,
        client_id: ConnectionId,
        chat_id: String,
        reader_user_id: String,
    ) -> Result<(), AppError> {
        let (identity, channel) = self.member_context(client_id, Some(chat_id))?;
        if channel.is_room() {
            return Err(AppError::InvalidChannel(channel.to_string()));
        }
        if identity.user_id.as_str() != reader_user_id {
            return Err(AppError::SenderMismatch);
        }

        if !self.receipts.advance(&channel, &identity.user_id, Utc::now()) {
            debug!("Read cursor of {} in {} not advanced", identity.user_id, channel);
            return Ok(());
        }

        let receipt = ServerMessage::MessagesRead(ReadReceipt {
            chat_id: channel.to_string(),
            reader_user_id,
        });
        self.registry.broadcast(&channel, &receipt, |c| {
            c.user_id().is_some_and(|u| *u != identity.user_id)
        });
        Ok(())
    }

    /// Load history off the event loop and reply to the requester directly
    fn handle_fetch_history(
        &self,
        client_id: ConnectionId,
        chat_id: Option<String>,
        limit: Option<usize>,
    ) -> Result<(), AppError> {
        let (_, channel) = self.member_context(client_id, chat_id)?;
        let sender = self
            .registry
            .get(client_id)
            .map(|c| c.sender.clone())
            .ok_or(AppError::UnknownConnection)?;
        let bridge = self.router.bridge().clone();

        tokio::spawn(async move {
            let reply = match bridge.history(&channel, limit).await {
                Ok(messages) => ServerMessage::History(HistoryPayload {
                    chat_id: channel,
                    messages,
                }),
                Err(e) => {
                    error!("Failed to load history for {}: {}", channel, e);
                    AppError::Store(e).into()
                }
            };
            let _ = sender.send(reply).await;
        });
        Ok(())
    }

    /// Sweep expired typing indicators and announce each
    fn expire_typing(&mut self) {
        for ended in self.typing.sweep(Instant::now()) {
            debug!("Typing indicator of {} in {} expired", ended.user_id, ended.channel);
            self.announce_typing_ended(ended);
        }
    }

    /// Cleanup after `identity` released `channel` on one connection
    fn release_channel(&mut self, identity: &Identity, channel: &ChannelId) {
        if channel.is_room() && self.presence.leave(&identity.display_name) == PresenceChange::Left {
            self.announce_presence(&identity.display_name, PresenceAction::Left);
        }

        // The user may still be in the channel through another connection
        if !self.registry.user_in_channel(&identity.user_id, channel) {
            if let Some(ended) = self.typing.stop(channel, &identity.user_id) {
                self.announce_typing_ended(ended);
            }
        }
    }

    /// Broadcast the membership snapshot followed by the join/leave notice
    fn announce_presence(&self, username: &str, action: PresenceAction) {
        let members = ServerMessage::MembersList(self.presence.snapshot());
        self.registry.broadcast(&ChannelId::Room, &members, |_| true);

        let notice = ServerMessage::RoomNotice(RoomNotice {
            username: username.to_string(),
            action,
        });
        self.registry.broadcast(&ChannelId::Room, &notice, |_| true);
    }

    /// Tell a connection that just joined `channel` who is already typing there
    fn replay_typing(&self, client_id: ConnectionId, own: &UserId, channel: &ChannelId) {
        for (user_id, name) in self.typing.typists(channel, Instant::now()) {
            if user_id != *own {
                let notice = ServerMessage::Typing(typing_notice(&name, channel));
                self.registry.send_to(client_id, notice);
            }
        }
    }

    fn announce_typing_ended(&self, ended: TypingEnded) {
        let notice = ServerMessage::StopTyping(typing_notice(&ended.display_name, &ended.channel));
        self.registry.broadcast(&ended.channel, &notice, |c| c.user_id() != Some(&ended.user_id));
    }

    /// Identity and joined channel for a channel-scoped event
    fn member_context(
        &self,
        client_id: ConnectionId,
        chat_id: Option<String>,
    ) -> Result<(Identity, ChannelId), AppError> {
        let conn = self
            .registry
            .get(client_id)
            .ok_or(AppError::UnknownConnection)?;
        let identity = conn.identity.clone().ok_or(AppError::IdentityRequired)?;

        let channel = match chat_id {
            None => ChannelId::Room,
            Some(raw) => ChannelId::parse(&raw).ok_or(AppError::InvalidChannel(raw))?,
        };

        if !conn.has_joined(&channel) {
            return Err(match channel {
                ChannelId::Room => AppError::NotInRoom,
                ChannelId::Private(id) => AppError::NotInChannel(id),
            });
        }
        Ok((identity, channel))
    }
}

fn parse_private(chat_id: &str) -> Result<ChannelId, AppError> {
    match ChannelId::parse(chat_id) {
        Some(channel @ ChannelId::Private(_)) => Ok(channel),
        _ => Err(AppError::InvalidChannel(chat_id.to_string())),
    }
}

fn typing_notice(username: &str, channel: &ChannelId) -> TypingNotice {
    TypingNotice {
        username: username.to_string(),
        chat_id: (!channel.is_room()).then(|| channel.clone()),
    }
}
