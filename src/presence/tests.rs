use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::store::{
    HeartbeatStore, KeyEvent, KeyEventKind, MemoryHeartbeatStore, parse_presence_key,
    presence_key,
};
use super::tracker::{PresenceEvent, PresenceStatus, PresenceTracker};
use super::watch::ContactWatch;
use crate::persistence::{LastSeenStore, SledLastSeenStore};
use crate::utils::error::{Error, Result};

const TTL: Duration = Duration::from_secs(300);
const RENEW: Duration = Duration::from_secs(60);

struct Fixture {
    store: Arc<MemoryHeartbeatStore>,
    durable: Arc<SledLastSeenStore>,
    tracker: Arc<PresenceTracker>,
    events: broadcast::Receiver<KeyEvent>,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(SledLastSeenStore::open(dir.path().to_str().unwrap()).unwrap());
        let store = Arc::new(MemoryHeartbeatStore::new());
        let events = store.notifications();
        let tracker = Arc::new(PresenceTracker::new(
            store.clone(),
            durable.clone(),
            TTL,
            RENEW,
        ));
        Self {
            store,
            durable,
            tracker,
            events,
            _dir: dir,
        }
    }

    /// Feeds every pending store notification to the tracker.
    async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.tracker.handle_event(event).await;
        }
    }
}

/// A heartbeat store that is always down.
struct UnavailableStore {
    events: broadcast::Sender<KeyEvent>,
}

#[async_trait]
impl HeartbeatStore for UnavailableStore {
    async fn set(&self, _key: &str, _value: DateTime<Utc>, _ttl: Duration) -> Result<()> {
        Err(Error::PresenceStoreUnavailable("connection refused".into()))
    }

    async fn get(&self, _key: &str) -> Result<Option<DateTime<Utc>>> {
        Err(Error::PresenceStoreUnavailable("connection refused".into()))
    }

    async fn remove(&self, _key: &str) -> Result<bool> {
        Err(Error::PresenceStoreUnavailable("connection refused".into()))
    }

    fn notifications(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }
}

fn drain(rx: &mut broadcast::Receiver<PresenceEvent>) -> Vec<PresenceEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[test]
fn test_presence_key_round_trip() {
    assert_eq!(presence_key(42), "user_status:42");
    assert_eq!(parse_presence_key("user_status:42"), Some(42));
    assert_eq!(parse_presence_key("user_status:abc"), None);
    assert_eq!(parse_presence_key("session:42"), None);
}

#[tokio::test]
async fn test_memory_store_expires_lazily_on_read() {
    let store = MemoryHeartbeatStore::new();
    let mut events = store.notifications();

    store
        .set("user_status:1", Utc::now(), Duration::from_millis(5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.get("user_status:1").await.unwrap(), None);
    assert_eq!(events.try_recv().unwrap().kind, KeyEventKind::Set);
    assert_eq!(events.try_recv().unwrap().kind, KeyEventKind::Expired);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_memory_store_sweep_only_expires_due_keys() {
    let store = MemoryHeartbeatStore::new();
    store
        .set("user_status:1", Utc::now(), Duration::from_secs(10))
        .await
        .unwrap();
    store
        .set("user_status:2", Utc::now(), Duration::from_secs(100))
        .await
        .unwrap();

    assert_eq!(store.sweep_at(Instant::now() + Duration::from_secs(11)), 1);
    assert_eq!(store.len(), 1);
    assert!(store.remove("user_status:2").await.unwrap());
    assert!(!store.remove("user_status:2").await.unwrap());
}

#[tokio::test]
async fn test_heartbeat_brings_user_online() {
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    assert!(!fx.tracker.is_online(5).await);
    assert!(fx.tracker.heartbeat(5).await.unwrap());
    fx.pump().await;

    assert!(fx.tracker.is_online(5).await);
    let events = drain(&mut observer);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user_id, 5);
    assert_eq!(events[0].status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_expiry_takes_user_offline_at_last_renewal() {
    // user 5 heartbeats with a 300 second TTL; the key expires at t=301
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    fx.tracker.heartbeat(5).await.unwrap();
    fx.pump().await;
    let renewed_at = fx.store.get(&presence_key(5)).await.unwrap().unwrap();

    assert_eq!(fx.store.sweep_at(Instant::now() + Duration::from_secs(301)), 1);
    fx.pump().await;

    assert!(!fx.tracker.is_online(5).await);
    assert_eq!(fx.tracker.last_seen(5).await.unwrap(), Some(renewed_at));
    assert_eq!(fx.durable.load(5).await.unwrap(), Some(renewed_at));

    let events = drain(&mut observer);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, PresenceStatus::Offline);
    assert_eq!(events[1].at, renewed_at);

    let status = fx.tracker.status(5).await.unwrap();
    assert_eq!(status.status, PresenceStatus::Offline);
    assert_eq!(status.last_seen, Some(renewed_at));
}

#[tokio::test]
async fn test_renewal_is_once_per_identity() {
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    assert!(fx.tracker.heartbeat(7).await.unwrap());
    // a second channel of the same user inside the renew interval
    assert!(!fx.tracker.heartbeat(7).await.unwrap());
    assert!(fx.tracker.heartbeat(8).await.unwrap());
    fx.pump().await;

    let online: Vec<_> = drain(&mut observer)
        .into_iter()
        .map(|e| e.user_id)
        .collect();
    assert_eq!(online, vec![7, 8]);
}

#[tokio::test]
async fn test_repeated_set_does_not_renotify() {
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    fx.store
        .set(&presence_key(3), Utc::now(), TTL)
        .await
        .unwrap();
    fx.store
        .set(&presence_key(3), Utc::now(), TTL)
        .await
        .unwrap();
    fx.pump().await;

    assert_eq!(drain(&mut observer).len(), 1);
}

#[tokio::test]
async fn test_sign_off_records_last_seen() {
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    fx.tracker.heartbeat(9).await.unwrap();
    fx.pump().await;
    let before = Utc::now();
    assert!(fx.tracker.sign_off(9).await.unwrap());
    fx.pump().await;

    assert!(!fx.tracker.is_online(9).await);
    let last_seen = fx.durable.load(9).await.unwrap().unwrap();
    assert!(last_seen >= before);

    let events = drain(&mut observer);
    assert_eq!(events.last().unwrap().status, PresenceStatus::Offline);

    // coming back right away writes a fresh heartbeat
    assert!(fx.tracker.heartbeat(9).await.unwrap());
    fx.pump().await;
    assert!(fx.tracker.is_online(9).await);
}

#[tokio::test]
async fn test_restarted_tracker_trusts_the_store() {
    let fx = Fixture::new();
    fx.store
        .set(&presence_key(1), Utc::now(), TTL)
        .await
        .unwrap();
    fx.store
        .set(&presence_key(2), Utc::now(), Duration::from_millis(5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // fresh tracker: no in-memory state, expiry of user 2 never observed
    let restarted = PresenceTracker::new(fx.store.clone(), fx.durable.clone(), TTL, RENEW);
    assert!(restarted.is_online(1).await);
    assert!(!restarted.is_online(2).await);
    assert_eq!(
        restarted.status(2).await.unwrap().status,
        PresenceStatus::Offline
    );
}

#[tokio::test]
async fn test_unavailable_store_falls_back_to_durable_last_seen() {
    let dir = tempfile::tempdir().unwrap();
    let durable = Arc::new(SledLastSeenStore::open(dir.path().to_str().unwrap()).unwrap());
    let seen = Utc::now();
    durable.record(4, seen).await.unwrap();

    let (events, _) = broadcast::channel(8);
    let tracker = PresenceTracker::new(
        Arc::new(UnavailableStore { events }),
        durable,
        TTL,
        RENEW,
    );

    assert!(!tracker.is_online(4).await);
    assert_eq!(tracker.last_seen(4).await.unwrap(), Some(seen));
    assert!(matches!(
        tracker.heartbeat(4).await,
        Err(Error::PresenceStoreUnavailable(_))
    ));
}

#[tokio::test]
async fn test_unrelated_keys_are_ignored() {
    let fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();
    fx.tracker
        .handle_event(KeyEvent {
            kind: KeyEventKind::Expired,
            key: "session:5".to_string(),
        })
        .await;
    assert!(drain(&mut observer).is_empty());
    assert_eq!(fx.durable.load(5).await.unwrap(), None);
}

#[tokio::test]
async fn test_run_loop_consumes_notifications() {
    let fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();
    tokio::spawn(fx.tracker.clone().run(fx.store.notifications()));

    fx.tracker.heartbeat(11).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), observer.recv())
        .await
        .expect("no presence event")
        .unwrap();
    assert_eq!(event.user_id, 11);
    assert_eq!(event.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_contact_watch_filters_by_contacts() {
    let mut fx = Fixture::new();
    let mut watch = ContactWatch::new(&fx.tracker, [5]);

    fx.tracker.heartbeat(6).await.unwrap();
    fx.tracker.heartbeat(5).await.unwrap();
    fx.pump().await;

    let event = tokio::time::timeout(Duration::from_secs(1), watch.next())
        .await
        .expect("no contact event")
        .unwrap();
    assert_eq!(event.user_id, 5);
    assert_eq!(event.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_offline_users_are_not_retained() {
    let mut fx = Fixture::new();
    let mut observer = fx.tracker.subscribe();

    fx.tracker.heartbeat(12).await.unwrap();
    fx.pump().await;
    assert_eq!(fx.tracker.online_count(), 1);

    fx.store.sweep_at(Instant::now() + Duration::from_secs(301));
    fx.pump().await;
    assert_eq!(fx.tracker.online_count(), 0);

    // a late duplicate notice records last seen again but tells no one
    fx.tracker
        .handle_event(KeyEvent {
            kind: KeyEventKind::Expired,
            key: presence_key(12),
        })
        .await;
    let statuses: Vec<_> = drain(&mut observer).into_iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![PresenceStatus::Online, PresenceStatus::Offline]
    );
    assert!(fx.durable.load(12).await.unwrap().is_some());
    assert_eq!(fx.tracker.online_count(), 0);
}
