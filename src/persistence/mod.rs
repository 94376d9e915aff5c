//! The `persistence` module stores the durable side of presence: the last
//! time each user was seen online.
//!
//! Live liveness is never kept here; it belongs to the heartbeat store. This
//! store is written on every offline transition and read when no live
//! heartbeat exists.

pub mod sled_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::broker::topic::UserId;
use crate::utils::error::Result;

pub use sled_store::SledLastSeenStore;

#[async_trait]
pub trait LastSeenStore: Send + Sync {
    async fn record(&self, user: UserId, at: DateTime<Utc>) -> Result<()>;
    async fn load(&self, user: UserId) -> Result<Option<DateTime<Utc>>>;
}
