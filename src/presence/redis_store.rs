//! Redis heartbeat store
//!
//! Keys are written with `SET key value EX ttl`; Redis expires them on its own
//! and announces `set`, `expired` and `del` on its keyevent channels. A
//! listener task turns those announcements into [`KeyEvent`]s, so every
//! process sharing the instance observes the same transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::presence::store::{HeartbeatStore, KeyEvent, KeyEventKind};
use crate::utils::error::{Error, Result};

const NOTIFICATION_CAPACITY: usize = 1024;

/// Keyevent classes the listener needs: `E` keyevent channel, `$` string
/// commands, `g` generic commands (DEL), `x` expiry.
const NOTIFY_FLAGS: &str = "E$gx";

const KEYEVENT_CHANNELS: [&str; 3] = [
    "__keyevent@*__:set",
    "__keyevent@*__:expired",
    "__keyevent@*__:del",
];

fn unavailable(e: RedisError) -> Error {
    Error::PresenceStoreUnavailable(e.to_string())
}

/// Maps a keyevent channel such as `__keyevent@0__:expired` to its kind.
pub fn parse_keyevent_channel(channel: &str) -> Option<KeyEventKind> {
    let (_, event) = channel.strip_prefix("__keyevent@")?.split_once("__:")?;
    match event {
        "set" => Some(KeyEventKind::Set),
        "expired" => Some(KeyEventKind::Expired),
        "del" => Some(KeyEventKind::Removed),
        _ => None,
    }
}

pub struct RedisHeartbeatStore {
    client: Client,
    conn: MultiplexedConnection,
    events: broadcast::Sender<KeyEvent>,
}

impl std::fmt::Debug for RedisHeartbeatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHeartbeatStore").finish_non_exhaustive()
    }
}

impl RedisHeartbeatStore {
    /// Connects to `url` and asks the server to publish the keyevents the
    /// listener relies on. Servers that refuse `CONFIG SET` must have
    /// `notify-keyspace-events` configured already.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        let configured: redis::RedisResult<()> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(NOTIFY_FLAGS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = configured {
            warn!(error = %e, "could not enable keyspace notifications; relying on server config");
        }

        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        info!(url, "connected to redis heartbeat store");
        Ok(Self {
            client,
            conn,
            events,
        })
    }

    /// Forwards keyevents until the subscription connection drops, then
    /// resubscribes after `retry`. Events published while disconnected are
    /// lost; expired keys then only surface on the next read.
    pub async fn run_listener(self: Arc<Self>, retry: Duration) {
        loop {
            match self.listen().await {
                Ok(()) => warn!("redis keyevent subscription ended"),
                Err(e) => warn!(error = %e, "redis keyevent subscription failed"),
            }
            tokio::time::sleep(retry).await;
        }
    }

    async fn listen(&self) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        for channel in KEYEVENT_CHANNELS {
            pubsub.psubscribe(channel).await.map_err(unavailable)?;
        }
        debug!("subscribed to redis keyevents");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let Some(kind) = parse_keyevent_channel(msg.get_channel_name()) else {
                continue;
            };
            let key: String = match msg.get_payload() {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "unreadable keyevent payload");
                    continue;
                }
            };
            // no subscribers is fine
            let _ = self.events.send(KeyEvent { kind, key });
        }
        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    async fn set(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value.to_rfc3339(), ttl.as_secs().max(1))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(unavailable)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| {
                    Error::PresenceStoreUnavailable(format!("malformed value under {key}: {e}"))
                })
        })
        .transpose()
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    fn notifications(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }
}
