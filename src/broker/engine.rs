//! Broker engine
//!
//! `Broker` is the process-wide entry point for connection lifecycle,
//! subscriptions and fan-out. Build it once at startup and share it as
//! `Arc<Broker>`; every method takes `&self` and the underlying maps use
//! per-key locking, so no caller needs an outer mutex.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::broker::dispatcher::{BroadcastReport, Dispatcher};
use crate::broker::message::{ChatEvent, MessageCreated};
use crate::broker::registry::ConnectionRegistry;
use crate::broker::subscriptions::SubscriptionIndex;
use crate::broker::topic::{TopicId, UserId};
use crate::channel::{Channel, ChannelId};
use crate::directory::ChatMembership;
use crate::utils::error::{Error, Result};

pub struct Broker {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    dispatcher: Dispatcher,
    membership: Arc<dyn ChatMembership>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("connected_users", &self.registry.connected_users())
            .finish()
    }
}

impl Broker {
    pub fn new(membership: Arc<dyn ChatMembership>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let dispatcher = Dispatcher::new(registry.clone(), subscriptions.clone());
        Self {
            registry,
            subscriptions,
            dispatcher,
            membership,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &SubscriptionIndex {
        &self.subscriptions
    }

    /// Admits an authenticated channel.
    pub fn connect(&self, user: UserId, channel: Channel) {
        self.registry.connect(user, channel);
    }

    /// Removes one channel. When it was the user's last channel the user is
    /// also dropped from every chat it subscribed to.
    ///
    /// Returns `true` when the user holds no channels afterwards.
    pub fn disconnect(&self, user: UserId, channel: ChannelId) -> bool {
        self.dispatcher.release(user, channel)
    }

    /// Drops every channel and every subscription of `user`. Each dropped
    /// channel is told to close its connection.
    pub fn disconnect_all(&self, user: UserId) -> Vec<Channel> {
        let mut topics = Vec::new();
        let channels = self
            .registry
            .remove_user_with(user, || topics = self.subscriptions.remove_user(user));
        for channel in &channels {
            channel.close();
        }
        info!(
            user,
            channels = channels.len(),
            topics = topics.len(),
            "disconnected user"
        );
        channels
    }

    pub fn subscribe(&self, user: UserId, topic: TopicId) {
        self.subscriptions.subscribe(user, topic);
        debug!(user, topic, "subscribed");
    }

    pub fn unsubscribe(&self, user: UserId, topic: TopicId) {
        self.subscriptions.unsubscribe(user, topic);
        debug!(user, topic, "unsubscribed");
    }

    /// Subscribes `user` to `topic` after the membership collaborator confirms
    /// the user takes part in that chat. The user must hold a channel; the
    /// subscription is added while that channel is pinned, so it cannot
    /// outlive a concurrent last disconnect.
    pub async fn join_chat(&self, user: UserId, topic: TopicId) -> Result<()> {
        if !self.membership.is_participant(topic, user).await {
            return Err(Error::NotParticipant { user, chat: topic });
        }
        self.registry
            .with_connected(user, || self.subscriptions.subscribe(user, topic))
            .ok_or(Error::NotConnected { user })?;
        debug!(user, topic, "subscribed");
        Ok(())
    }

    pub fn channels_for(&self, user: UserId) -> Vec<Channel> {
        self.registry.channels_for(user)
    }

    pub fn subscribers_of(&self, topic: TopicId) -> Vec<UserId> {
        self.subscriptions.subscribers_of(topic)
    }

    pub fn broadcast<P: Serialize + ?Sized>(
        &self,
        topic: TopicId,
        payload: &P,
    ) -> Result<BroadcastReport> {
        self.dispatcher.broadcast(topic, payload)
    }

    /// Wraps a freshly stored message in its `new_message` envelope and fans it
    /// out to the chat.
    pub fn publish_message(&self, message: MessageCreated) -> Result<BroadcastReport> {
        let event = ChatEvent::NewMessage(message);
        self.broadcast(event.chat_id(), &event)
    }
}
