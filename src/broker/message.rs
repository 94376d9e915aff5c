//! Events the broker consumes and the envelope it fans out.
//!
//! `MessageCreated` is produced by the message persistence service once a
//! message has been validated and stored. Subscribers receive it wrapped as
//! `{"type": "new_message", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::topic::{TopicId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub id: i64,
    pub chat_id: TopicId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Frames pushed to subscribers of a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    NewMessage(MessageCreated),
}

impl ChatEvent {
    pub fn chat_id(&self) -> TopicId {
        match self {
            ChatEvent::NewMessage(m) => m.chat_id,
        }
    }
}
