//! Last-seen store backed by `sled`
//!
//! One JSON record per user in the `last_seen` tree, keyed by the user id in
//! big-endian bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::debug;

use crate::broker::topic::UserId;
use crate::persistence::LastSeenStore;
use crate::utils::error::Result;

const LAST_SEEN_TREE: &str = "last_seen";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LastSeenRecord {
    pub user_id: UserId,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SledLastSeenStore {
    db: Db,
    tree: Tree,
}

impl SledLastSeenStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self> {
        let tree = db.open_tree(LAST_SEEN_TREE)?;
        Ok(Self { db, tree })
    }

    pub fn store(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        let record = LastSeenRecord {
            user_id: user,
            last_seen: at,
        };
        let serialized = serde_json::to_vec(&record)?;
        self.tree.insert(user.to_be_bytes(), serialized)?;
        debug!(user, last_seen = %at, "stored last seen");
        Ok(())
    }

    pub fn fetch(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        match self.tree.get(user.to_be_bytes())? {
            Some(raw) => {
                let record: LastSeenRecord = serde_json::from_slice(&raw)?;
                Ok(Some(record.last_seen))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl LastSeenStore for SledLastSeenStore {
    async fn record(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        self.store(user, at)
    }

    async fn load(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        self.fetch(user)
    }
}

impl std::fmt::Debug for SledLastSeenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLastSeenStore")
            .field("db", &"sled::Db")
            .field("records", &self.tree.len())
            .finish()
    }
}
