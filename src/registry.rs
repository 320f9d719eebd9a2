//! Session registry
//!
//! Maps live connections to their identity and joined channels, and fans
//! messages out to the connections joined to a channel. Performs no
//! presence broadcasts itself; callers drive those from the values it returns.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, Identity};
use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::types::{ChannelId, ConnectionId, UserId};

/// What a connection held when it was removed
#[derive(Debug)]
pub struct Unbound {
    pub identity: Option<Identity>,
    pub channels: HashSet<ChannelId>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection
    pub fn connect(&mut self, id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.connections.insert(id, Connection::new(id, sender));
    }

    /// Bind an identity to a connection
    ///
    /// Idempotent for the same identity; fails if a different one is bound.
    pub fn bind(&mut self, id: ConnectionId, identity: Identity) -> Result<&Identity, AppError> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(AppError::UnknownConnection)?;

        if let Some(bound) = &conn.identity {
            if *bound != identity {
                return Err(AppError::IdentityConflict {
                    bound: bound.display_name.clone(),
                });
            }
        }

        Ok(conn.identity.get_or_insert(identity))
    }

    /// Remove a connection, releasing every membership it held
    pub fn unbind(&mut self, id: ConnectionId) -> Option<Unbound> {
        self.connections.remove(&id).map(|conn| Unbound {
            identity: conn.identity,
            channels: conn.channels,
        })
    }

    /// Add a channel membership; returns false if already joined
    pub fn join(&mut self, id: ConnectionId, channel: ChannelId) -> bool {
        self.connections
            .get_mut(&id)
            .map(|conn| conn.channels.insert(channel))
            .unwrap_or(false)
    }

    /// Drop a channel membership; returns false if not joined
    pub fn leave(&mut self, id: ConnectionId, channel: &ChannelId) -> bool {
        self.connections
            .get_mut(&id)
            .map(|conn| conn.channels.remove(channel))
            .unwrap_or(false)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn identity(&self, id: ConnectionId) -> Option<&Identity> {
        self.connections.get(&id).and_then(|c| c.identity.as_ref())
    }

    /// Connections currently joined to a channel
    pub fn members<'a>(&'a self, channel: &'a ChannelId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .values()
            .filter(move |conn| conn.has_joined(channel))
    }

    /// Check whether any connection of `user` is still joined to `channel`
    pub fn user_in_channel(&self, user: &UserId, channel: &ChannelId) -> bool {
        self.members(channel).any(|conn| conn.user_id() == Some(user))
    }

    /// Queue for one connection without waiting on it
    pub fn send_to(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|conn| deliver(conn, msg))
    }

    /// Queue for every member of `channel` accepted by `filter`
    ///
    /// Never waits on a connection: a client whose outbox is full misses the
    /// event instead of stalling the actor. Returns the number of connections
    /// the message was queued for.
    pub fn broadcast<F>(&self, channel: &ChannelId, msg: &ServerMessage, filter: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        self.members(channel)
            .filter(|c| filter(*c))
            .filter(|c| deliver(c, msg.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

fn deliver(conn: &Connection, msg: ServerMessage) -> bool {
    match conn.try_send(msg) {
        Ok(()) => true,
        Err(SendError::Full) => {
            warn!("Outbox of {} full, dropping event", conn.id);
            false
        }
        Err(SendError::ChannelClosed) => {
            debug!("Outbox of {} closed", conn.id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(n: usize) -> (SessionRegistry, Vec<(ConnectionId, mpsc::Receiver<ServerMessage>)>) {
        let mut registry = SessionRegistry::new();
        let conns = (0..n)
            .map(|_| {
                let (tx, rx) = mpsc::channel(16);
                let id = ConnectionId::new();
                registry.connect(id, tx);
                (id, rx)
            })
            .collect();
        (registry, conns)
    }

    #[test]
    fn test_bind_is_idempotent_for_same_identity() {
        let (mut registry, conns) = registry_with(1);
        let id = conns[0].0;

        registry.bind(id, Identity::new("u1", "alice")).unwrap();
        registry.bind(id, Identity::new("u1", "alice")).unwrap();

        assert_eq!(registry.identity(id), Some(&Identity::new("u1", "alice")));
    }

    #[test]
    fn test_bind_rejects_different_identity() {
        let (mut registry, conns) = registry_with(1);
        let id = conns[0].0;

        registry.bind(id, Identity::new("u1", "alice")).unwrap();
        let err = registry.bind(id, Identity::new("u2", "mallory")).unwrap_err();

        assert!(matches!(err, AppError::IdentityConflict { .. }));
        assert_eq!(registry.identity(id), Some(&Identity::new("u1", "alice")));
    }

    #[test]
    fn test_bind_unknown_connection() {
        let mut registry = SessionRegistry::new();
        let err = registry
            .bind(ConnectionId::new(), Identity::new("u1", "alice"))
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownConnection));
    }

    #[test]
    fn test_unbind_releases_memberships() {
        let (mut registry, conns) = registry_with(2);
        let (a, b) = (conns[0].0, conns[1].0);
        let chat = ChannelId::Private("u1_u2".to_string());

        registry.bind(a, Identity::new("u1", "alice")).unwrap();
        assert!(registry.join(a, ChannelId::Room));
        assert!(registry.join(a, chat.clone()));
        assert!(!registry.join(a, ChannelId::Room));
        registry.join(b, ChannelId::Room);

        let unbound = registry.unbind(a).unwrap();
        assert_eq!(unbound.identity, Some(Identity::new("u1", "alice")));
        assert_eq!(unbound.channels.len(), 2);

        assert_eq!(registry.members(&ChannelId::Room).count(), 1);
        assert_eq!(registry.members(&chat).count(), 0);
        assert!(registry.unbind(a).is_none());
    }

    #[test]
    fn test_unbind_without_identity() {
        let (mut registry, conns) = registry_with(1);
        let unbound = registry.unbind(conns[0].0).unwrap();
        assert!(unbound.identity.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_respects_filter() {
        let (mut registry, mut conns) = registry_with(3);
        for (id, _) in &conns {
            registry.join(*id, ChannelId::Room);
        }
        let skip = conns[0].0;

        let sent = registry
            .broadcast(&ChannelId::Room, &ServerMessage::MembersList(vec![]), |c| c.id != skip);

        assert_eq!(sent, 2);
        assert!(conns[0].1.try_recv().is_err());
        assert!(conns[1].1.try_recv().is_ok());
        assert!(conns[2].1.try_recv().is_ok());
    }

    #[test]
    fn test_full_outbox_does_not_block_others() {
        let mut registry = SessionRegistry::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        let (slow, fast) = (ConnectionId::new(), ConnectionId::new());
        registry.connect(slow, slow_tx);
        registry.connect(fast, fast_tx);
        registry.join(slow, ChannelId::Room);
        registry.join(fast, ChannelId::Room);

        for i in 0..5 {
            let msg = ServerMessage::MembersList(vec![format!("m{}", i)]);
            let sent = registry.broadcast(&ChannelId::Room, &msg, |_| true);
            // The slow client only takes the first one
            assert_eq!(sent, if i == 0 { 2 } else { 1 });
        }

        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
        assert!(!registry.send_to(slow, ServerMessage::MembersList(vec![])));
        assert!(registry.send_to(fast, ServerMessage::MembersList(vec![])));
    }
}
