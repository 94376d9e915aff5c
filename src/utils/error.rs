//! Error types shared by every `chatsub` module.
//!
//! Registry, subscription and dispatch operations never fail on missing keys,
//! so most variants here come from the edges: token verification, the
//! presence stores, configuration and I/O.

use thiserror::Error;

use crate::broker::topic::{TopicId, UserId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("user {user} is not a participant of chat {chat}")]
    NotParticipant { user: UserId, chat: TopicId },

    #[error("user {user} holds no open connection")]
    NotConnected { user: UserId },

    #[error("presence store unavailable: {0}")]
    PresenceStoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a bearer credential is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("token has expired")]
    Expired,
    #[error("could not validate credentials")]
    Invalid,
    #[error("token subject is not a user id")]
    BadSubject,
}
