use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

/// Unique identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Why a frame could not be queued for a channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("channel closed")]
    Closed,
    /// The outbound queue is full; the consumer is not keeping up.
    #[error("outbound queue full")]
    Backlogged,
}

/// Non-owning handle to a live connection.
///
/// Cloning is cheap and every clone refers to the same outbound queue.
/// Equality and hashing only consider the id.
///
/// `close` asks the owning connection to shut the socket. The broker calls it
/// when it drops a channel on its own (failed delivery, `disconnect_all`), so
/// the client notices and can reconnect.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    sender: Sender<WsMessage>,
    shutdown: CancellationToken,
}

impl Channel {
    /// Creates a channel with an outbound queue of `capacity` frames and
    /// returns the receiving half for the connection's writer task.
    pub fn new(capacity: usize) -> (Self, Receiver<WsMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ChannelId::new(),
                sender,
                shutdown: CancellationToken::new(),
            },
            receiver,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, msg: WsMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signals the connection to close. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once `close` has been called on any clone.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.shutdown.is_cancelled()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
