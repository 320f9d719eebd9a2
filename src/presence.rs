//! Shared-room presence
//!
//! Tracks the display names currently present in the shared room.
//! Membership is keyed by display name: connections sharing a name collapse
//! into one entry, which stays present until the last of them leaves.

use std::collections::BTreeMap;

/// Outcome of a presence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// Name entered the member set
    Joined,
    /// Name left the member set
    Left,
    /// Member set unchanged (name still held by another connection, or unknown)
    Unchanged,
}

/// Shared-room member set
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Display name -> number of connections present under it
    members: BTreeMap<String, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more connection present under `name`
    pub fn join(&mut self, name: &str) -> PresenceChange {
        match self.members.get_mut(name) {
            Some(connections) => {
                *connections += 1;
                PresenceChange::Unchanged
            }
            None => {
                self.members.insert(name.to_string(), 1);
                PresenceChange::Joined
            }
        }
    }

    /// Record one connection under `name` leaving
    pub fn leave(&mut self, name: &str) -> PresenceChange {
        let Some(connections) = self.members.get_mut(name) else {
            return PresenceChange::Unchanged;
        };

        *connections -= 1;
        if *connections == 0 {
            self.members.remove(name);
            PresenceChange::Left
        } else {
            PresenceChange::Unchanged
        }
    }

    #[cfg(test)]
    fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Sorted snapshot of present names
    pub fn snapshot(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let mut presence = PresenceTracker::new();

        assert_eq!(presence.join("bob"), PresenceChange::Joined);
        assert_eq!(presence.join("alice"), PresenceChange::Joined);
        assert_eq!(presence.snapshot(), vec!["alice", "bob"]);

        assert_eq!(presence.leave("bob"), PresenceChange::Left);
        assert_eq!(presence.snapshot(), vec!["alice"]);
        assert!(!presence.contains("bob"));
    }

    #[test]
    fn test_leave_unknown_name() {
        let mut presence = PresenceTracker::new();
        assert_eq!(presence.leave("ghost"), PresenceChange::Unchanged);
        assert!(presence.is_empty());
    }

    #[test]
    fn test_colliding_names_last_to_leave_removes() {
        let mut presence = PresenceTracker::new();

        assert_eq!(presence.join("alice"), PresenceChange::Joined);
        assert_eq!(presence.join("alice"), PresenceChange::Unchanged);
        assert_eq!(presence.len(), 1);

        assert_eq!(presence.leave("alice"), PresenceChange::Unchanged);
        assert!(presence.contains("alice"));

        assert_eq!(presence.leave("alice"), PresenceChange::Left);
        assert!(presence.is_empty());

        // Extra leave must not underflow or corrupt state
        assert_eq!(presence.leave("alice"), PresenceChange::Unchanged);
    }

    #[test]
    fn test_membership_matches_unmatched_joins() {
        // (name, join?) sequence; the expected set is every name with an
        // unmatched join at the end
        let events = [
            ("a", true),
            ("b", true),
            ("a", false),
            ("c", true),
            ("b", false),
            ("b", true),
            ("d", true),
            ("d", false),
        ];
        let mut presence = PresenceTracker::new();
        let mut open: BTreeMap<&str, usize> = BTreeMap::new();

        for (name, join) in events {
            if join {
                presence.join(name);
                *open.entry(name).or_default() += 1;
            } else {
                presence.leave(name);
                if let Some(n) = open.get_mut(name) {
                    *n -= 1;
                    if *n == 0 {
                        open.remove(name);
                    }
                }
            }
        }

        let expected: Vec<String> = open.keys().map(|k| k.to_string()).collect();
        assert_eq!(presence.snapshot(), expected);
        assert_eq!(expected, vec!["b", "c"]);
    }
}
