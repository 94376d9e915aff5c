//! Broadcast dispatcher
//!
//! Fans one payload out to every channel of every subscriber of a chat.
//!
//! - The payload is serialized once into a single text frame; recipients get
//!   cheap clones of it.
//! - Subscribers and channels are read as snapshots taken at call time.
//!   Users subscribing afterwards may miss this broadcast.
//! - Delivery is a non-blocking enqueue on the channel's bounded queue. A
//!   closed or full queue marks the channel dead: it is pruned and delivery
//!   carries on with the remaining channels. Nothing is retried. The pruned
//!   channel is told to close so its connection does not linger unregistered.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::registry::ConnectionRegistry;
use crate::broker::subscriptions::SubscriptionIndex;
use crate::broker::topic::{TopicId, UserId};
use crate::channel::ChannelId;
use crate::utils::error::Result;

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Frames queued successfully.
    pub delivered: usize,
    /// Channels removed after a failed delivery.
    pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, subscriptions: Arc<SubscriptionIndex>) -> Self {
        Self {
            registry,
            subscriptions,
        }
    }

    /// Serializes `payload` as JSON and delivers it to `topic`.
    ///
    /// Only serialization can fail; delivery failures are handled internally.
    pub fn broadcast<P: Serialize + ?Sized>(
        &self,
        topic: TopicId,
        payload: &P,
    ) -> Result<BroadcastReport> {
        let text = serde_json::to_string(payload)?;
        Ok(self.broadcast_frame(topic, WsMessage::text(text)))
    }

    /// Delivers an already encoded frame to `topic`.
    pub fn broadcast_frame(&self, topic: TopicId, frame: WsMessage) -> BroadcastReport {
        let subscribers = self.subscriptions.subscribers_of(topic);
        let mut report = BroadcastReport {
            recipients: subscribers.len(),
            ..Default::default()
        };

        for user in subscribers {
            for channel in self.registry.channels_for(user) {
                match channel.try_deliver(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(user, topic, channel = %channel.id(), error = %e, "delivery failed, pruning channel");
                        channel.close();
                        self.release(user, channel.id());
                        report.pruned += 1;
                    }
                }
            }
        }

        debug!(
            topic,
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned,
            "broadcast complete"
        );
        report
    }

    /// Removes one channel and, if it was the user's last, the user's
    /// subscriptions. Safe to call repeatedly.
    ///
    /// Returns `true` when the user holds no channels afterwards.
    pub fn release(&self, user: UserId, channel: ChannelId) -> bool {
        self.registry.disconnect_with(user, channel, || {
            let topics = self.subscriptions.remove_user(user);
            if !topics.is_empty() {
                debug!(user, topics = ?topics, "removed subscriptions of disconnected user");
            }
        })
    }
}
