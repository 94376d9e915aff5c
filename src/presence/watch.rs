use std::collections::HashSet;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::broker::topic::UserId;
use crate::presence::tracker::{PresenceEvent, PresenceTracker};

/// Presence transitions of one observer's contacts.
pub struct ContactWatch {
    events: broadcast::Receiver<PresenceEvent>,
    contacts: HashSet<UserId>,
}

impl ContactWatch {
    pub fn new(tracker: &PresenceTracker, contacts: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            events: tracker.subscribe(),
            contacts: contacts.into_iter().collect(),
        }
    }

    /// Next transition of a watched contact, or `None` once the tracker is gone.
    pub async fn next(&mut self) -> Option<PresenceEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) if self.contacts.contains(&event.user_id) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "contact watch lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
