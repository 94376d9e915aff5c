//! WebSocket protocol frames. Every frame is a JSON object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::topic::{TopicId, UserId};
use crate::presence::{PresenceEvent, PresenceStatus};

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { chat_id: TopicId },
    Unsubscribe { chat_id: TopicId },
    /// Keeps the sender's presence alive; any other frame does too.
    Heartbeat,
    /// Asks whether a user is online and when they were last seen.
    Status { user_id: UserId },
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { chat_id: TopicId },
    Unsubscribed { chat_id: TopicId },
    Error { message: String },
    /// A contact went online or offline.
    Presence(PresenceEvent),
    /// Answer to a `status` query.
    Status {
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    },
}
