//! Read receipts
//!
//! `ReadReceiptTracker` keeps the per-(channel, user) read cursor on the
//! server. `DeliveryStatus` is the sender-side view of one outbound private
//! message, driven by the events the server pushes back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::message::ServerMessage;
use crate::types::{ChannelId, DeliveryId, UserId};

/// Monotonic "has read up to" markers
#[derive(Debug, Default)]
pub struct ReadReceiptTracker {
    cursors: HashMap<(ChannelId, UserId), DateTime<Utc>>,
}

impl ReadReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the reader's cursor to `at`
    ///
    /// Returns false (and leaves the cursor alone) unless `at` is strictly
    /// ahead of the current cursor.
    pub fn advance(&mut self, channel: &ChannelId, reader: &UserId, at: DateTime<Utc>) -> bool {
        let key = (channel.clone(), reader.clone());
        match self.cursors.get_mut(&key) {
            Some(cursor) if *cursor >= at => false,
            Some(cursor) => {
                *cursor = at;
                true
            }
            None => {
                self.cursors.insert(key, at);
                true
            }
        }
    }

    #[cfg(test)]
    fn cursor(&self, channel: &ChannelId, reader: &UserId) -> Option<DateTime<Utc>> {
        self.cursors.get(&(channel.clone(), reader.clone())).copied()
    }

    /// Check whether `reader` has read a message sent at `sent_at`
    #[cfg(test)]
    fn has_read(&self, channel: &ChannelId, reader: &UserId, sent_at: DateTime<Utc>) -> bool {
        self.cursor(channel, reader).is_some_and(|cursor| cursor >= sent_at)
    }
}

/// Visual state of a message on its sender's side
///
/// Only ever moves forward: Sending -> Delivered -> Read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryStatus {
    Sending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Apply one server event to the status of the message `delivery_id`
    /// that `own_user` sent into `channel`.
    pub fn observe(
        self,
        event: &ServerMessage,
        own_user: &UserId,
        channel: &ChannelId,
        delivery_id: &DeliveryId,
    ) -> Self {
        let next = match event {
            ServerMessage::PrivateMessage(msg)
                if msg.chat_id == *channel && msg.delivery_id == *delivery_id =>
            {
                Self::Delivered
            }
            ServerMessage::MessagesRead(receipt)
                if receipt.chat_id == channel.as_str()
                    && receipt.reader_user_id != own_user.as_str() =>
            {
                Self::Read
            }
            _ => self,
        };
        self.max(next)
    }
}
