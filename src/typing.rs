//! Typing coordinator
//!
//! Ephemeral "user is typing" state per (channel, user). An indicator is live
//! until its expiry; renewals push the expiry forward. The server actor sweeps
//! expired entries periodically and pushes an explicit stop event for each, so
//! no per-typist timer exists.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::{ChannelId, UserId};

#[derive(Debug)]
struct TypingEntry {
    display_name: String,
    expires_at: Instant,
}

/// An indicator that ended, to be announced to the rest of the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEnded {
    pub channel: ChannelId,
    pub user_id: UserId,
    pub display_name: String,
}

#[derive(Debug)]
pub struct TypingCoordinator {
    timeout: Duration,
    active: HashMap<(ChannelId, UserId), TypingEntry>,
}

impl TypingCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: HashMap::new(),
        }
    }

    /// Set or refresh typing state
    ///
    /// Returns true when the indicator starts (was absent or already stale),
    /// which is when the rest of the channel needs to hear about it.
    pub fn signal(&mut self, channel: ChannelId, user_id: UserId, display_name: &str, now: Instant) -> bool {
        let expires_at = now + self.timeout;
        match self.active.get_mut(&(channel.clone(), user_id.clone())) {
            Some(entry) => {
                let started = entry.expires_at <= now;
                entry.expires_at = expires_at;
                started
            }
            None => {
                self.active.insert(
                    (channel, user_id),
                    TypingEntry {
                        display_name: display_name.to_string(),
                        expires_at,
                    },
                );
                true
            }
        }
    }

    /// Clear typing state; returns the ended indicator if there was one
    ///
    /// An entry already past its expiry but not yet swept is returned too,
    /// since removing it here hides it from the next sweep.
    pub fn stop(&mut self, channel: &ChannelId, user_id: &UserId) -> Option<TypingEnded> {
        let key = (channel.clone(), user_id.clone());
        let entry = self.active.remove(&key)?;
        Some(TypingEnded {
            channel: key.0,
            user_id: key.1,
            display_name: entry.display_name,
        })
    }

    #[cfg(test)]
    fn is_typing(&self, channel: &ChannelId, user_id: &UserId, now: Instant) -> bool {
        self.active
            .get(&(channel.clone(), user_id.clone()))
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Users with a live indicator in `channel`, sorted by display name
    pub fn typists(&self, channel: &ChannelId, now: Instant) -> Vec<(UserId, String)> {
        let mut typists: Vec<(UserId, String)> = self
            .active
            .iter()
            .filter(|((c, _), entry)| c == channel && entry.expires_at > now)
            .map(|((_, user_id), entry)| (user_id.clone(), entry.display_name.clone()))
            .collect();
        typists.sort_by(|a, b| a.1.cmp(&b.1));
        typists
    }

    /// Remove every indicator whose idle window has elapsed
    pub fn sweep(&mut self, now: Instant) -> Vec<TypingEnded> {
        let expired: Vec<(ChannelId, UserId)> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                self.active.remove(&key).map(|entry| TypingEnded {
                    channel: key.0,
                    user_id: key.1,
                    display_name: entry.display_name,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TypingCoordinator {
        TypingCoordinator::new(Duration::from_secs(3))
    }

    #[test]
    fn test_signal_starts_once_and_refreshes() {
        let mut typing = coordinator();
        let t0 = Instant::now();
        let u1 = UserId::new("u1");

        assert!(typing.signal(ChannelId::Room, u1.clone(), "alice", t0));
        assert!(!typing.signal(ChannelId::Room, u1.clone(), "alice", t0 + Duration::from_secs(2)));

        // Refresh at t=2 keeps it live past the original expiry
        assert!(typing.is_typing(&ChannelId::Room, &u1, t0 + Duration::from_millis(4500)));
        assert!(!typing.is_typing(&ChannelId::Room, &u1, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_auto_expires_without_renewal() {
        let mut typing = coordinator();
        let t0 = Instant::now();
        let chat = ChannelId::Private("u1_u2".to_string());
        let u1 = UserId::new("u1");

        typing.signal(chat.clone(), u1.clone(), "alice", t0);
        assert_eq!(
            typing.typists(&chat, t0 + Duration::from_secs(1)),
            vec![(u1.clone(), "alice".to_string())]
        );

        let later = t0 + Duration::from_millis(3500);
        assert!(!typing.is_typing(&chat, &u1, later));
        assert!(typing.typists(&chat, later).is_empty());

        let ended = typing.sweep(later);
        assert_eq!(
            ended,
            vec![TypingEnded {
                channel: chat,
                user_id: u1,
                display_name: "alice".to_string(),
            }]
        );
        assert!(typing.is_empty());
    }

    #[test]
    fn test_signal_after_expiry_restarts() {
        let mut typing = coordinator();
        let t0 = Instant::now();
        let u1 = UserId::new("u1");

        typing.signal(ChannelId::Room, u1.clone(), "alice", t0);
        assert!(typing.signal(ChannelId::Room, u1, "alice", t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_stop_ends_indicator_once() {
        let mut typing = coordinator();
        let t0 = Instant::now();
        let u1 = UserId::new("u1");

        typing.signal(ChannelId::Room, u1.clone(), "alice", t0);
        assert!(typing.stop(&ChannelId::Room, &u1).is_some());
        assert!(typing.stop(&ChannelId::Room, &u1).is_none());
        assert!(typing.is_empty());
    }

    #[test]
    fn test_stop_after_expiry_before_sweep_still_ends() {
        let mut typing = coordinator();
        let t0 = Instant::now();
        let u1 = UserId::new("u1");

        typing.signal(ChannelId::Room, u1.clone(), "alice", t0);

        // Stale by t0+3.1s but the sweep has not run yet
        assert!(!typing.is_typing(&ChannelId::Room, &u1, t0 + Duration::from_millis(3100)));
        let ended = typing.stop(&ChannelId::Room, &u1);
        assert_eq!(
            ended,
            Some(TypingEnded {
                channel: ChannelId::Room,
                user_id: u1,
                display_name: "alice".to_string(),
            })
        );
        // Exactly one announcement: the sweep finds nothing left
        assert!(typing.sweep(t0 + Duration::from_millis(3200)).is_empty());
    }

    #[test]
    fn test_sweep_keeps_live_entries() {
        let mut typing = coordinator();
        let t0 = Instant::now();

        typing.signal(ChannelId::Room, UserId::new("u1"), "alice", t0);
        typing.signal(ChannelId::Room, UserId::new("u2"), "bob", t0 + Duration::from_secs(2));

        let ended = typing.sweep(t0 + Duration::from_secs(3));
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].display_name, "alice");
        assert_eq!(typing.len(), 1);
    }
}
