//! Topic management
//!
//! A `Topic` holds the set of user ids subscribed to one chat. Duplicate
//! subscriptions are a no-op.
//!
//! Concurrency note: topics live inside the subscription index's map and are
//! only mutated through its per-key entry guards.

use std::collections::HashSet;

/// Identity handed out by the authentication collaborator.
pub type UserId = i64;

/// Chat identifier; the unit of broadcast subscription.
pub type TopicId = i64;

#[derive(Debug, Default, Clone)]
pub struct Topic {
    pub id: TopicId,
    pub subscribers: HashSet<UserId>,
}

impl Topic {
    /// Create an empty topic for the given chat.
    pub fn new(id: TopicId) -> Self {
        Self {
            id,
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, user: UserId) -> bool {
        self.subscribers.insert(user)
    }

    /// Remove a subscriber from the topic.
    pub fn unsubscribe(&mut self, user: &UserId) -> bool {
        self.subscribers.remove(user)
    }
}
