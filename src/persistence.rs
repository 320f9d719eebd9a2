//! Persistence bridge
//!
//! The durable path of a message, decoupled from live delivery. The actor hands
//! each accepted message to `PersistenceBridge::append`, which only enqueues it;
//! a single writer task applies queued appends to the `MessageStore` in accept
//! order. Write failures are logged and never retried against the live path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::types::{ChannelId, DeliveryId, UserId};

/// An accepted message, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel_id: ChannelId,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub delivery_id: DeliveryId,
}

/// History query options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Keep only the most recent `limit` messages
    pub limit: Option<usize>,
}

/// Upsert-or-merge update of a channel summary record
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryUpdate {
    /// Participants recorded when the channel record is first created
    pub members: Vec<UserId>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// Channel summary record as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// Key-ordered durable message store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably append a message under its channel
    async fn persist_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Messages of a channel in ascending time order
    async fn fetch_history(&self, channel: &ChannelId, query: HistoryQuery) -> Result<Vec<Message>, StoreError>;

    /// Create the channel record if missing, then merge the summary fields
    async fn upsert_channel_summary(&self, channel: &ChannelId, update: SummaryUpdate) -> Result<(), StoreError>;
}

/// In-process store keyed by insertion sequence per channel
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<ChannelId, BTreeMap<u64, Message>>>,
    summaries: RwLock<HashMap<ChannelId, ChannelSummary>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn summary(&self, channel: &ChannelId) -> Option<ChannelSummary> {
        self.summaries.read().await.get(channel).cloned()
    }

    pub async fn message_count(&self, channel: &ChannelId) -> usize {
        self.messages
            .read()
            .await
            .get(channel)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(&self, message: &Message) -> Result<(), StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.messages
            .write()
            .await
            .entry(message.channel_id.clone())
            .or_default()
            .insert(seq, message.clone());
        Ok(())
    }

    async fn fetch_history(&self, channel: &ChannelId, query: HistoryQuery) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let Some(log) = messages.get(channel) else {
            return Ok(Vec::new());
        };

        let skip = query
            .limit
            .map(|limit| log.len().saturating_sub(limit))
            .unwrap_or(0);
        Ok(log.values().skip(skip).cloned().collect())
    }

    async fn upsert_channel_summary(&self, channel: &ChannelId, update: SummaryUpdate) -> Result<(), StoreError> {
        let mut summaries = self.summaries.write().await;
        let summary = summaries
            .entry(channel.clone())
            .or_insert_with(|| ChannelSummary {
                members: update.members.iter().map(|m| m.0.clone()).collect(),
                created_at: update.last_message_at,
                last_message: String::new(),
                last_message_at: update.last_message_at,
            });

        for member in &update.members {
            if !summary.members.iter().any(|m| *m == member.0) {
                summary.members.push(member.0.clone());
            }
        }
        summary.last_message = update.last_message;
        summary.last_message_at = update.last_message_at;
        Ok(())
    }
}

/// Work items for the writer task
enum PersistJob {
    Append {
        message: Message,
        members: Vec<UserId>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the durable path
///
/// Cheap to clone; all clones feed the same writer task.
#[derive(Clone)]
pub struct PersistenceBridge {
    store: Arc<dyn MessageStore>,
    queue: mpsc::UnboundedSender<PersistJob>,
    room_history_limit: usize,
}

impl PersistenceBridge {
    /// Start the writer task and return a handle to it
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn MessageStore>, room_history_limit: usize) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&store), jobs));
        Self {
            store,
            queue,
            room_history_limit,
        }
    }

    /// Queue a message for durable storage without waiting for it
    pub fn append(&self, message: Message, members: Vec<UserId>) {
        let channel = message.channel_id.clone();
        let delivery_id = message.delivery_id.clone();
        if self.queue.send(PersistJob::Append { message, members }).is_err() {
            error!(
                channel = %channel,
                delivery_id = %delivery_id,
                "Persistence writer stopped, message not stored"
            );
        }
    }

    /// Resolve once every append queued before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.queue.send(PersistJob::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Load channel history in ascending order
    ///
    /// The shared room is capped at the configured bound; private channels
    /// are unbounded unless `limit` is given.
    pub async fn history(&self, channel: &ChannelId, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
        let limit = match channel {
            ChannelId::Room => Some(
                limit
                    .unwrap_or(self.room_history_limit)
                    .min(self.room_history_limit),
            ),
            ChannelId::Private(_) => limit,
        };
        self.store.fetch_history(channel, HistoryQuery { limit }).await
    }
}

async fn run_writer(store: Arc<dyn MessageStore>, mut jobs: mpsc::UnboundedReceiver<PersistJob>) {
    debug!("Persistence writer started");

    while let Some(job) = jobs.recv().await {
        match job {
            PersistJob::Append { message, members } => {
                if let Err(e) = write(store.as_ref(), &message, members).await {
                    error!(
                        channel = %message.channel_id,
                        delivery_id = %message.delivery_id,
                        sender = %message.sender_id,
                        sent_at = %message.sent_at,
                        text = ?message.text,
                        "Failed to persist message: {}",
                        e
                    );
                }
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    info!("Persistence writer shutting down");
}

async fn write(store: &dyn MessageStore, message: &Message, members: Vec<UserId>) -> Result<(), StoreError> {
    store.persist_message(message).await?;
    store
        .upsert_channel_summary(
            &message.channel_id,
            SummaryUpdate {
                members,
                last_message: message.text.clone(),
                last_message_at: message.sent_at,
            },
        )
        .await
}
