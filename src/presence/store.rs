//! Heartbeat store
//!
//! Liveness lives in a time-bounded key store: each online user has a key
//! `user_status:{id}` holding its last renewal time, and the key disappears
//! when its TTL elapses. The store announces writes, expiries and removals on
//! a notification stream, which is how the presence tracker learns about
//! transitions. Nothing in this process schedules per-user timers.
//!
//! `MemoryHeartbeatStore` is the in-process store. Expiry is observed lazily
//! on reads and actively by `sweep`, the same way a networked key store
//! expires keys.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broker::topic::UserId;
use crate::utils::error::Result;

pub const PRESENCE_KEY_PREFIX: &str = "user_status:";

const NOTIFICATION_CAPACITY: usize = 1024;

pub fn presence_key(user: UserId) -> String {
    format!("{PRESENCE_KEY_PREFIX}{user}")
}

/// Extracts the user id from a presence key. Other keys yield `None`.
pub fn parse_presence_key(key: &str) -> Option<UserId> {
    key.strip_prefix(PRESENCE_KEY_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Set,
    Expired,
    Removed,
}

/// A keyspace notification: what happened to which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: String,
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()>;

    /// Reads a live value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Deletes `key`; returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Subscribes to set/expired/removed notifications.
    fn notifications(&self) -> broadcast::Receiver<KeyEvent>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: DateTime<Utc>,
    deadline: Instant,
}

#[derive(Debug)]
pub struct MemoryHeartbeatStore {
    entries: DashMap<String, Entry>,
    events: broadcast::Sender<KeyEvent>,
}

impl Default for MemoryHeartbeatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHeartbeatStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            entries: DashMap::new(),
            events,
        }
    }

    fn emit(&self, kind: KeyEventKind, key: &str) {
        trace!(?kind, key, "key event");
        // no subscribers is fine
        let _ = self.events.send(KeyEvent {
            kind,
            key: key.to_string(),
        });
    }

    /// Expires every key whose deadline is at or before `now`.
    ///
    /// Returns the number of keys expired.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut expired = 0;
        for key in due {
            if self
                .entries
                .remove_if(&key, |_, e| e.deadline <= now)
                .is_some()
            {
                self.emit(KeyEventKind::Expired, &key);
                expired += 1;
            }
        }
        expired
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Runs `sweep` every `period` until the task is dropped.
    pub async fn run_sweeper(self: std::sync::Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = self.sweep();
            if expired > 0 {
                debug!(expired, "expired heartbeat keys");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn set(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                deadline: Instant::now() + ttl,
            },
        );
        self.emit(KeyEventKind::Set, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let now = Instant::now();
        let entry = self.entries.get(key).map(|e| *e);
        match entry {
            Some(e) if e.deadline > now => Ok(Some(e.value)),
            Some(_) => {
                if self
                    .entries
                    .remove_if(key, |_, e| e.deadline <= now)
                    .is_some()
                {
                    self.emit(KeyEventKind::Expired, key);
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.emit(KeyEventKind::Removed, key);
        }
        Ok(existed)
    }

    fn notifications(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }
}
