//! Lookups answered by other services: chat membership and contact lists.
//!
//! The broker and the presence fan-out trust these answers and never derive
//! membership themselves. `InMemoryDirectory` serves tests and single-node
//! deployments, filled from the `[directory]` config section.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::broker::topic::{TopicId, UserId};
use crate::config::DirectorySettings;

#[async_trait]
pub trait ChatMembership: Send + Sync {
    /// Whether `user` takes part in chat `topic`.
    async fn is_participant(&self, topic: TopicId, user: UserId) -> bool;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Users whose presence `user` is allowed to watch.
    async fn contacts_of(&self, user: UserId) -> Vec<UserId>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    members: DashMap<TopicId, HashSet<UserId>>,
    contacts: DashMap<UserId, HashSet<UserId>>,
    open_chats: bool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every user may join every chat.
    pub fn permissive() -> Self {
        Self {
            open_chats: true,
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &DirectorySettings) -> Self {
        let directory = Self {
            open_chats: settings.open_chats,
            ..Self::default()
        };
        for chat in &settings.chats {
            for &user in &chat.members {
                directory.add_member(chat.id, user);
            }
        }
        for list in &settings.contacts {
            for &contact in &list.contacts {
                directory.add_contact(list.user, contact);
            }
        }
        directory
    }

    pub fn add_member(&self, topic: TopicId, user: UserId) {
        self.members.entry(topic).or_default().insert(user);
    }

    /// Records that `user` watches `contact`. Contacts are one-directional.
    pub fn add_contact(&self, user: UserId, contact: UserId) {
        self.contacts.entry(user).or_default().insert(contact);
    }
}

#[async_trait]
impl ChatMembership for InMemoryDirectory {
    async fn is_participant(&self, topic: TopicId, user: UserId) -> bool {
        self.open_chats
            || self
                .members
                .get(&topic)
                .is_some_and(|members| members.contains(&user))
    }
}

#[async_trait]
impl ContactDirectory for InMemoryDirectory {
    async fn contacts_of(&self, user: UserId) -> Vec<UserId> {
        self.contacts
            .get(&user)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }
}
