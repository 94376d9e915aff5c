//! Presence: online/offline state derived from expiring heartbeats.

#[cfg(feature = "redis-backend")]
pub mod redis_store;
pub mod store;
pub mod tracker;
pub mod watch;

#[cfg(feature = "redis-backend")]
pub use redis_store::RedisHeartbeatStore;
pub use store::{HeartbeatStore, KeyEvent, KeyEventKind, MemoryHeartbeatStore};
pub use tracker::{PresenceEvent, PresenceStatus, PresenceTracker, UserStatus};
pub use watch::ContactWatch;

#[cfg(test)]
mod tests;
