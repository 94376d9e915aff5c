//! Connection registry
//!
//! Maps each user id to the channels it currently holds (one per device or
//! tab). Backed by a sharded `DashMap` so connects and disconnects for
//! unrelated users never contend on a single lock.
//!
//! Invariant: a user present in the map always has at least one channel.
//!
//! Work that must not interleave with a user's connect (dropping their
//! subscriptions once the last channel is gone, adding one only while a
//! channel exists) runs while the user's shard lock is held.

use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::broker::topic::UserId;
use crate::channel::{Channel, ChannelId};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, HashMap<ChannelId, Channel>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers `channel` under `user`, creating the user's set if needed.
    pub fn connect(&self, user: UserId, channel: Channel) {
        let id = channel.id();
        let count = {
            let mut set = self.connections.entry(user).or_default();
            set.insert(id, channel);
            set.len()
        };
        debug!(user, channel = %id, channels = count, "channel connected");
    }

    /// Removes one channel from `user`. Unknown users and channels are ignored,
    /// so racing close paths may call this more than once.
    ///
    /// Returns `true` when the user holds no channels afterwards.
    pub fn disconnect(&self, user: UserId, channel: ChannelId) -> bool {
        self.disconnect_with(user, channel, || {})
    }

    /// Like `disconnect`, but runs `on_gone` under the user's lock when the
    /// user holds no channels afterwards. A concurrent `connect` for the same
    /// user waits until `on_gone` returns.
    pub fn disconnect_with(&self, user: UserId, channel: ChannelId, on_gone: impl FnOnce()) -> bool {
        match self.connections.entry(user) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&channel).is_some() {
                    debug!(user, channel = %channel, "channel disconnected");
                }
                if !entry.get().is_empty() {
                    return false;
                }
                on_gone();
                entry.remove();
                true
            }
            Entry::Vacant(_) => {
                on_gone();
                true
            }
        }
    }

    /// Drops every channel held by `user` and returns them.
    pub fn remove_user(&self, user: UserId) -> Vec<Channel> {
        self.remove_user_with(user, || {})
    }

    /// Like `remove_user`, running `on_gone` before the user's lock is released.
    pub fn remove_user_with(&self, user: UserId, on_gone: impl FnOnce()) -> Vec<Channel> {
        match self.connections.entry(user) {
            Entry::Occupied(entry) => {
                on_gone();
                entry.remove().into_values().collect()
            }
            Entry::Vacant(_) => {
                on_gone();
                Vec::new()
            }
        }
    }

    /// Runs `f` only if `user` holds a channel, keeping the user's channels
    /// in place until `f` returns.
    pub fn with_connected<R>(&self, user: UserId, f: impl FnOnce() -> R) -> Option<R> {
        let _held = self.connections.get(&user)?;
        Some(f())
    }

    /// Snapshot of the user's channels. Empty when the user is not connected.
    pub fn channels_for(&self, user: UserId) -> Vec<Channel> {
        self.connections
            .get(&user)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, user: UserId) -> bool {
        self.connections.contains_key(&user)
    }

    /// Number of users holding at least one channel.
    pub fn connected_users(&self) -> usize {
        self.connections.len()
    }
}
