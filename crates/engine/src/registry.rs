//! Live connection registry.
//!
//! Maps a recipient identity to the single push channel currently open for it.
//! State is in-process only: it starts empty, is mutated by connect and
//! disconnect events, and is lost on restart. The notification store is what
//! makes delivery survive that loss.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use herald_common::types::RecordView;

/// Live events a channel buffers before pushes start failing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// An event written to a recipient's push channel.
///
/// The serde form is the wire format: `type` names the event and `data` is
/// the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// First event on every channel.
    Connected {
        connection_id: Uuid,
        identity: String,
        timestamp: DateTime<Utc>,
    },
    /// A notification, replayed or live.
    Notification(RecordView),
    /// A newer connection for the same identity took over this one. Last
    /// event on the stream; clients should not reconnect on it.
    Superseded { connection_id: Uuid },
}

impl PushEvent {
    /// Event name used on the wire. Matches the serde `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::Connected { .. } => "connected",
            PushEvent::Notification(_) => "notification",
            PushEvent::Superseded { .. } => "superseded",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Push channel {0} is closed")]
    ChannelClosed(Uuid),

    #[error("Push channel {0} is full")]
    QueueFull(Uuid),
}

/// Sending half of one open connection.
///
/// Clones share the same underlying connection. Two handles are the same
/// channel iff their connection ids match.
#[derive(Debug, Clone)]
pub struct PushChannel {
    connection_id: Uuid,
    sender: mpsc::Sender<PushEvent>,
    superseded: CancellationToken,
}

impl PushChannel {
    /// Open a new channel with the default queue size.
    pub fn open() -> (Self, mpsc::Receiver<PushEvent>) {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Open a new channel buffering at most `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<PushEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let channel = Self {
            connection_id: Uuid::new_v4(),
            sender,
            superseded: CancellationToken::new(),
        };
        (channel, receiver)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue an event without waiting.
    ///
    /// Fails once the receiver is gone, or when a slow reader has let the
    /// queue fill up.
    pub fn push(&self, event: PushEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(self.connection_id),
            mpsc::error::TrySendError::Closed(_) => {
                DeliveryError::ChannelClosed(self.connection_id)
            }
        })
    }

    /// Tell the reading side a newer connection replaced it.
    ///
    /// Does not go through the queue, so it lands even when the queue is full.
    pub fn supersede(&self) {
        self.superseded.cancel();
    }

    /// Resolves once [`supersede`](Self::supersede) has been called on any clone.
    pub async fn superseded(&self) {
        self.superseded.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.superseded.is_cancelled()
    }

    pub fn same_channel(&self, other: &PushChannel) -> bool {
        self.connection_id == other.connection_id
    }
}

/// Concurrent identity → channel map.
///
/// None of the operations await, and no shard lock outlives a call.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: DashMap<String, PushChannel>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store `channel` for `identity`, replacing any previous one.
    ///
    /// The displaced channel is handed back so the caller can close it.
    pub fn register(&self, identity: &str, channel: PushChannel) -> Option<PushChannel> {
        let connection_id = channel.connection_id;
        let previous = self.channels.insert(identity.to_string(), channel);

        tracing::debug!(
            identity,
            connection_id = %connection_id,
            replaced = previous.is_some(),
            "Push channel registered"
        );
        previous
    }

    /// Remove the mapping for `identity` only if it still points at `channel`.
    ///
    /// A disconnect that arrives after a newer connect for the same identity
    /// leaves the newer channel in place. Returns whether anything was removed.
    pub fn unregister(&self, identity: &str, channel: &PushChannel) -> bool {
        let removed = self
            .channels
            .remove_if(identity, |_, current| current.same_channel(channel))
            .is_some();

        tracing::debug!(
            identity,
            connection_id = %channel.connection_id,
            removed,
            "Push channel unregistered"
        );
        removed
    }

    /// Current channel for `identity`, if one is open.
    pub fn lookup(&self, identity: &str) -> Option<PushChannel> {
        self.channels
            .get(identity)
            .map(|entry| entry.value().clone())
            .filter(|channel| !channel.is_closed())
    }

    /// Number of distinct registered identities.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
