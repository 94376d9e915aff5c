//! Subscription index
//!
//! Tracks which users follow which chats, independent of how many channels a
//! user holds: a message for a chat reaches every device of every subscriber.
//!
//! A reverse index (user -> topics) lets a full disconnect remove the user
//! from exactly the topics it joined instead of scanning every topic.
//! The two maps are never locked at the same time.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::broker::topic::{Topic, TopicId, UserId};

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    topics: DashMap<TopicId, Topic>,
    user_topics: DashMap<UserId, HashSet<TopicId>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            user_topics: DashMap::new(),
        }
    }

    /// Subscribes `user` to `topic`. Creates the topic on first use.
    pub fn subscribe(&self, user: UserId, topic: TopicId) {
        self.topics
            .entry(topic)
            .or_insert_with(|| Topic::new(topic))
            .subscribe(user);
        self.user_topics.entry(user).or_default().insert(topic);
    }

    /// Removes `user` from `topic`. Empty topics are kept.
    pub fn unsubscribe(&self, user: UserId, topic: TopicId) {
        if let Some(mut t) = self.topics.get_mut(&topic) {
            t.unsubscribe(&user);
        }
        if let Some(mut topics) = self.user_topics.get_mut(&user) {
            topics.remove(&topic);
        }
        self.user_topics.remove_if(&user, |_, topics| topics.is_empty());
    }

    /// Snapshot of the subscribers of `topic`.
    pub fn subscribers_of(&self, topic: TopicId) -> Vec<UserId> {
        self.topics
            .get(&topic)
            .map(|t| t.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the topics `user` is subscribed to.
    pub fn topics_of(&self, user: UserId) -> Vec<TopicId> {
        self.user_topics
            .get(&user)
            .map(|topics| topics.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, user: UserId, topic: TopicId) -> bool {
        self.topics
            .get(&topic)
            .is_some_and(|t| t.subscribers.contains(&user))
    }

    /// Removes `user` from every topic it joined and returns those topics.
    pub fn remove_user(&self, user: UserId) -> Vec<TopicId> {
        let topics: Vec<TopicId> = self
            .user_topics
            .remove(&user)
            .map(|(_, topics)| topics.into_iter().collect())
            .unwrap_or_default();

        for topic in &topics {
            if let Some(mut t) = self.topics.get_mut(topic) {
                t.unsubscribe(&user);
            }
        }
        topics
    }
}
