//! Presence tracker
//!
//! Per-user state machine: Unknown -> Online -> Offline -> Online -> ...
//!
//! Transitions are driven only by heartbeat store notifications:
//! - `Set` on a user's key: Unknown/Offline -> Online (observers notified).
//! - `Expired` on a user's key: -> Offline at the last renewal time.
//! - `Removed` (sign-off) on a user's key: -> Offline at the time of removal.
//!
//! Offline transitions persist the last-seen time to the durable store.
//! Liveness queries always go to the heartbeat store; the in-memory state only
//! detects transitions and holds online users alone, so a restarted tracker
//! treats everyone as offline until their next heartbeat. An offline
//! notification for a user it never saw online still records last-seen but
//! tells no observer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::topic::UserId;
use crate::config::PresenceSettings;
use crate::persistence::LastSeenStore;
use crate::presence::store::{
    HeartbeatStore, KeyEvent, KeyEventKind, parse_presence_key, presence_key,
};
use crate::utils::error::Result;

const OBSERVER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Raised to observers on every online/offline transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub at: DateTime<Utc>,
}

/// Answer to "is this user online, and when were they last seen".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

pub struct PresenceTracker {
    heartbeats: Arc<dyn HeartbeatStore>,
    last_seen: Arc<dyn LastSeenStore>,
    ttl: Duration,
    renew_interval: Duration,
    /// Online users and their last observed renewal.
    online: DashMap<UserId, DateTime<Utc>>,
    renewed: DashMap<UserId, Instant>,
    observers: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(
        heartbeats: Arc<dyn HeartbeatStore>,
        last_seen: Arc<dyn LastSeenStore>,
        ttl: Duration,
        renew_interval: Duration,
    ) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            heartbeats,
            last_seen,
            ttl,
            renew_interval,
            online: DashMap::new(),
            renewed: DashMap::new(),
            observers,
        }
    }

    pub fn from_settings(
        heartbeats: Arc<dyn HeartbeatStore>,
        last_seen: Arc<dyn LastSeenStore>,
        settings: &PresenceSettings,
    ) -> Self {
        Self::new(
            heartbeats,
            last_seen,
            Duration::from_secs(settings.heartbeat_ttl_secs),
            Duration::from_secs(settings.renew_interval_secs),
        )
    }

    /// Renews the user's heartbeat record.
    ///
    /// Renewal is per identity: if this user was renewed less than
    /// `renew_interval` ago (from any of its channels) the write is skipped.
    /// Returns whether the store was written.
    pub async fn heartbeat(&self, user: UserId) -> Result<bool> {
        let now = Instant::now();
        let recent = self
            .renewed
            .get(&user)
            .is_some_and(|last| now.duration_since(*last) < self.renew_interval);
        if recent {
            return Ok(false);
        }

        self.heartbeats
            .set(&presence_key(user), Utc::now(), self.ttl)
            .await?;
        self.renewed.insert(user, now);
        debug!(user, "heartbeat renewed");
        Ok(true)
    }

    /// Deletes the user's heartbeat record after its last channel closed.
    /// The store's removal notification drives the offline transition.
    pub async fn sign_off(&self, user: UserId) -> Result<bool> {
        self.renewed.remove(&user);
        self.heartbeats.remove(&presence_key(user)).await
    }

    /// Applies one store notification. Keys that are not presence keys are
    /// ignored.
    pub async fn handle_event(&self, event: KeyEvent) {
        let Some(user) = parse_presence_key(&event.key) else {
            return;
        };

        match event.kind {
            KeyEventKind::Set => {
                let renewed_at = match self.heartbeats.get(&event.key).await {
                    Ok(Some(at)) => at,
                    // already gone; its expiry/removal event follows
                    Ok(None) => return,
                    Err(e) => {
                        warn!(user, error = %e, "could not read heartbeat value");
                        Utc::now()
                    }
                };
                if self.online.insert(user, renewed_at).is_none() {
                    info!(user, "user online");
                    self.notify(user, PresenceStatus::Online, renewed_at);
                }
            }
            KeyEventKind::Expired => {
                let renewed_at = self.online.remove(&user).map(|(_, at)| at);
                self.go_offline(user, renewed_at.is_some(), renewed_at.unwrap_or_else(Utc::now))
                    .await;
            }
            KeyEventKind::Removed => {
                let was_online = self.online.remove(&user).is_some();
                self.go_offline(user, was_online, Utc::now()).await;
            }
        }
    }

    async fn go_offline(&self, user: UserId, was_online: bool, at: DateTime<Utc>) {
        self.renewed.remove(&user);

        if let Err(e) = self.last_seen.record(user, at).await {
            error!(user, error = %e, "failed to persist last seen");
        }
        if was_online {
            info!(user, last_seen = %at, "user offline");
            self.notify(user, PresenceStatus::Offline, at);
        } else {
            debug!(user, last_seen = %at, "offline notice for a user not seen online");
        }
    }

    /// Number of users currently held as online.
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    fn notify(&self, user: UserId, status: PresenceStatus, at: DateTime<Utc>) {
        // no observers is fine
        let _ = self.observers.send(PresenceEvent {
            user_id: user,
            status,
            at,
        });
    }

    /// Registers an observer for every transition.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.observers.subscribe()
    }

    /// True iff the heartbeat store holds a live record. An unavailable store
    /// reads as offline.
    pub async fn is_online(&self, user: UserId) -> bool {
        match self.heartbeats.get(&presence_key(user)).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                warn!(user, error = %e, "heartbeat store unavailable, reporting offline");
                false
            }
        }
    }

    /// The live record's timestamp, or else the durable last-seen value.
    pub async fn last_seen(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.status(user).await?.last_seen)
    }

    pub async fn status(&self, user: UserId) -> Result<UserStatus> {
        match self.heartbeats.get(&presence_key(user)).await {
            Ok(Some(at)) => {
                return Ok(UserStatus {
                    status: PresenceStatus::Online,
                    last_seen: Some(at),
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user, error = %e, "heartbeat store unavailable, using durable last seen");
            }
        }
        Ok(UserStatus {
            status: PresenceStatus::Offline,
            last_seen: self.last_seen.load(user).await?,
        })
    }

    /// Consumes store notifications until the stream closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<KeyEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "presence notifications lagged");
                }
                Err(RecvError::Closed) => {
                    info!("presence notification stream closed");
                    break;
                }
            }
        }
    }
}
