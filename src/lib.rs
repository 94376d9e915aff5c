//! # chatsub
//!
//! `chatsub` is the real-time side of a chat backend: it keeps track of who is
//! connected, which chats they follow, fans newly stored messages out to every
//! live device of every participant, and derives online/offline presence from
//! expiring heartbeats.
//!
//! ## Core Modules
//!
//! - `broker`: connection registry, chat subscription index and the broadcast
//!   dispatcher, behind the `Broker` facade.
//! - `channel`: the handle the registry keeps for each live connection.
//! - `presence`: heartbeat store, presence tracker and contact watches.
//! - `persistence`: durable last-seen storage (sled).
//! - `auth`, `directory`: collaborators for token verification, chat
//!   membership and contact lists.
//! - `transport`: the WebSocket server and the message event feed.
//! - `config`, `utils`: settings, errors and logging.

pub mod auth;
pub mod broker;
pub mod channel;
pub mod config;
pub mod directory;
pub mod persistence;
pub mod presence;
pub mod transport;
pub mod utils;
