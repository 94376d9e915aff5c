use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc::Receiver;
use tungstenite::protocol::Message as WsMessage;

use super::Broker;
use super::message::MessageCreated;
use super::registry::ConnectionRegistry;
use super::subscriptions::SubscriptionIndex;
use super::topic::Topic;
use crate::channel::Channel;
use crate::directory::InMemoryDirectory;
use crate::utils::error::Error;

fn broker_with(directory: InMemoryDirectory) -> Broker {
    Broker::new(Arc::new(directory))
}

fn received(rx: &mut Receiver<WsMessage>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            WsMessage::Text(text) => frames.push(serde_json::from_str(&text).unwrap()),
            other => panic!("Expected a text message, got {other:?}"),
        }
    }
    frames
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new(7);
    assert!(topic.subscribers.is_empty());
    assert!(topic.subscribe(42));
    assert!(!topic.subscribe(42));
    assert!(topic.unsubscribe(&42));
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_registry_connect_and_disconnect() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = Channel::new(8);
    let (b, _rx_b) = Channel::new(8);

    registry.connect(42, a.clone());
    registry.connect(42, b.clone());
    assert_eq!(registry.channels_for(42).len(), 2);

    assert!(!registry.disconnect(42, a.id()));
    assert_eq!(registry.channels_for(42), vec![b.clone()]);

    assert!(registry.disconnect(42, b.id()));
    assert!(registry.channels_for(42).is_empty());
    assert!(!registry.is_connected(42));
    assert_eq!(registry.connected_users(), 0);
}

#[test]
fn test_registry_disconnect_is_idempotent() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = Channel::new(8);
    let (b, _rx_b) = Channel::new(8);
    registry.connect(1, a.clone());
    registry.connect(1, b.clone());

    registry.disconnect(1, a.id());
    registry.disconnect(1, a.id());
    assert_eq!(registry.channels_for(1), vec![b]);

    // unknown users are not an error
    assert!(registry.disconnect(99, a.id()));
    assert!(registry.channels_for(99).is_empty());
}

#[test]
fn test_registry_snapshot_is_detached() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = Channel::new(8);
    registry.connect(1, a.clone());

    let snapshot = registry.channels_for(1);
    registry.disconnect(1, a.id());
    assert_eq!(snapshot, vec![a]);
}

#[test]
fn test_subscription_index_tracks_both_directions() {
    let index = SubscriptionIndex::new();
    index.subscribe(42, 7);
    index.subscribe(42, 7);
    index.subscribe(42, 8);
    index.subscribe(5, 7);

    let mut subs = index.subscribers_of(7);
    subs.sort();
    assert_eq!(subs, vec![5, 42]);
    let mut topics = index.topics_of(42);
    topics.sort();
    assert_eq!(topics, vec![7, 8]);

    index.unsubscribe(42, 7);
    index.unsubscribe(42, 7);
    assert!(!index.is_subscribed(42, 7));
    assert_eq!(index.topics_of(42), vec![8]);
    assert!(index.subscribers_of(99).is_empty());
}

#[test]
fn test_subscription_index_remove_user() {
    let index = SubscriptionIndex::new();
    index.subscribe(42, 7);
    index.subscribe(42, 8);
    index.subscribe(5, 7);

    let mut removed = index.remove_user(42);
    removed.sort();
    assert_eq!(removed, vec![7, 8]);
    assert_eq!(index.subscribers_of(7), vec![5]);
    assert!(index.subscribers_of(8).is_empty());
    assert!(index.topics_of(42).is_empty());
}

#[test]
fn test_broadcast_reaches_only_subscribers() {
    let broker = broker_with(InMemoryDirectory::new());
    let (sub, mut sub_rx) = Channel::new(8);
    let (other, mut other_rx) = Channel::new(8);
    broker.connect(1, sub);
    broker.connect(2, other);
    broker.subscribe(1, 7);

    let report = broker.broadcast(7, &json!({"x": 1})).unwrap();
    assert_eq!(report.recipients, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.pruned, 0);

    assert_eq!(received(&mut sub_rx), vec![json!({"x": 1})]);
    assert!(received(&mut other_rx).is_empty());
}

#[test]
fn test_broadcast_prunes_failed_channel() {
    // user 42 holds channels A and B and follows chat 7
    let broker = broker_with(InMemoryDirectory::new());
    let (a, mut rx_a) = Channel::new(8);
    let (b, rx_b) = Channel::new(8);
    broker.connect(42, a.clone());
    broker.connect(42, b.clone());
    broker.subscribe(42, 7);

    let first = broker.broadcast(7, &json!({"x": 1})).unwrap();
    assert_eq!(first.delivered, 2);
    assert_eq!(received(&mut rx_a), vec![json!({"x": 1})]);

    drop(rx_b);

    let second = broker.broadcast(7, &json!({"x": 2})).unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(second.pruned, 1);
    assert_eq!(received(&mut rx_a), vec![json!({"x": 2})]);
    assert_eq!(broker.channels_for(42), vec![a]);
    assert_eq!(broker.subscribers_of(7), vec![42]);
}

#[test]
fn test_backlogged_channel_does_not_block_others() {
    let broker = broker_with(InMemoryDirectory::new());
    let (slow, _slow_rx) = Channel::new(1);
    let (fast, mut fast_rx) = Channel::new(8);
    broker.connect(1, slow.clone());
    broker.connect(2, fast);
    broker.subscribe(1, 7);
    broker.subscribe(2, 7);

    broker.broadcast(7, &json!({"n": 1})).unwrap();
    let report = broker.broadcast(7, &json!({"n": 2})).unwrap();

    assert_eq!(report.pruned, 1);
    assert!(broker.channels_for(1).is_empty());
    assert_eq!(received(&mut fast_rx), vec![json!({"n": 1}), json!({"n": 2})]);
}

#[test]
fn test_last_channel_pruned_drops_subscriptions() {
    let broker = broker_with(InMemoryDirectory::new());
    let (only, rx) = Channel::new(8);
    broker.connect(3, only);
    broker.subscribe(3, 7);
    broker.subscribe(3, 9);
    drop(rx);

    let report = broker.broadcast(7, &json!({})).unwrap();
    assert_eq!(report.pruned, 1);
    assert!(broker.subscribers_of(7).is_empty());
    assert!(broker.subscribers_of(9).is_empty());
}

#[test]
fn test_disconnect_last_channel_cleans_subscriptions() {
    let broker = broker_with(InMemoryDirectory::new());
    let (a, _rx_a) = Channel::new(8);
    let (b, _rx_b) = Channel::new(8);
    broker.connect(42, a.clone());
    broker.connect(42, b.clone());
    broker.subscribe(42, 7);

    assert!(!broker.disconnect(42, a.id()));
    assert_eq!(broker.subscribers_of(7), vec![42]);

    assert!(broker.disconnect(42, b.id()));
    assert!(broker.disconnect(42, b.id()));
    assert!(broker.subscribers_of(7).is_empty());
}

#[test]
fn test_disconnect_all() {
    let broker = broker_with(InMemoryDirectory::new());
    let (a, _rx_a) = Channel::new(8);
    let (b, _rx_b) = Channel::new(8);
    broker.connect(42, a);
    broker.connect(42, b);
    broker.subscribe(42, 7);

    assert_eq!(broker.disconnect_all(42).len(), 2);
    assert!(broker.channels_for(42).is_empty());
    assert!(broker.subscribers_of(7).is_empty());
    assert!(broker.disconnect_all(42).is_empty());
}

#[test]
fn test_broadcast_to_empty_topic() {
    let broker = broker_with(InMemoryDirectory::new());
    let report = broker.broadcast(404, &json!({"x": 1})).unwrap();
    assert_eq!(report, Default::default());
}

#[test]
fn test_subscriber_without_channels_receives_nothing() {
    let broker = broker_with(InMemoryDirectory::new());
    broker.subscribe(8, 7);
    let report = broker.broadcast(7, &json!({})).unwrap();
    assert_eq!(report.recipients, 1);
    assert_eq!(report.delivered, 0);
}

#[tokio::test]
async fn test_join_chat_checks_membership() {
    let directory = InMemoryDirectory::new();
    directory.add_member(7, 42);
    let broker = broker_with(directory);
    let (channel, _rx) = Channel::new(8);
    broker.connect(42, channel);

    broker.join_chat(42, 7).await.unwrap();
    assert_eq!(broker.subscribers_of(7), vec![42]);

    let err = broker.join_chat(5, 7).await.unwrap_err();
    assert!(matches!(err, Error::NotParticipant { user: 5, chat: 7 }));
    assert_eq!(broker.subscribers_of(7), vec![42]);
}

#[test]
fn test_publish_message_uses_new_message_envelope() {
    let broker = broker_with(InMemoryDirectory::new());
    let (channel, mut rx) = Channel::new(8);
    broker.connect(42, channel);
    broker.subscribe(42, 7);

    let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    broker
        .publish_message(MessageCreated {
            id: 10,
            chat_id: 7,
            sender_id: 5,
            content: "hi".to_string(),
            sent_at,
        })
        .unwrap();

    let frames = received(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "new_message");
    assert_eq!(frames[0]["data"]["id"], 10);
    assert_eq!(frames[0]["data"]["chat_id"], 7);
    assert_eq!(frames[0]["data"]["sender_id"], 5);
    assert_eq!(frames[0]["data"]["content"], "hi");
}

#[tokio::test]
async fn test_concurrent_connects_for_same_user() {
    let broker = Arc::new(broker_with(InMemoryDirectory::new()));
    let mut handles = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..16 {
        let (channel, rx) = Channel::new(8);
        receivers.push(rx);
        let broker = broker.clone();
        handles.push(tokio::spawn(async move { broker.connect(1, channel) }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(broker.channels_for(1).len(), 16);
}

#[tokio::test]
async fn test_pruned_channel_is_closed_and_cannot_rejoin() {
    let broker = broker_with(InMemoryDirectory::permissive());
    let (channel, _rx) = Channel::new(1);
    broker.connect(42, channel.clone());
    broker.join_chat(42, 7).await.unwrap();

    broker.broadcast(7, &json!({"n": 1})).unwrap();
    let report = broker.broadcast(7, &json!({"n": 2})).unwrap();
    assert_eq!(report.pruned, 1);
    assert!(channel.is_closed());
    tokio::time::timeout(std::time::Duration::from_secs(1), channel.closed())
        .await
        .expect("pruned channel was not told to close");

    let err = broker.join_chat(42, 7).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected { user: 42 }));
    assert!(broker.subscribers_of(7).is_empty());
}

#[test]
fn test_disconnect_all_closes_channels() {
    let broker = broker_with(InMemoryDirectory::new());
    let (a, _rx_a) = Channel::new(8);
    broker.connect(42, a.clone());

    broker.disconnect_all(42);
    assert!(a.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_racing_last_disconnect_keeps_new_subscription() {
    let broker = Arc::new(broker_with(InMemoryDirectory::permissive()));
    for _ in 0..200 {
        let (old, _rx_old) = Channel::new(8);
        broker.connect(42, old.clone());
        broker.join_chat(42, 7).await.unwrap();

        let closing = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.disconnect(42, old.id()) })
        };
        let (fresh, _rx_fresh) = Channel::new(8);
        let joining = {
            let broker = broker.clone();
            let fresh = fresh.clone();
            tokio::spawn(async move {
                broker.connect(42, fresh);
                broker.join_chat(42, 7).await
            })
        };
        closing.await.unwrap();
        joining.await.unwrap().unwrap();

        assert_eq!(broker.channels_for(42), vec![fresh.clone()]);
        assert_eq!(broker.subscribers_of(7), vec![42]);
        broker.disconnect(42, fresh.id());
        assert!(broker.subscribers_of(7).is_empty());
    }
}

#[test]
fn test_with_connected_requires_a_channel() {
    let registry = ConnectionRegistry::new();
    assert_eq!(registry.with_connected(1, || "ran"), None);

    let (a, _rx) = Channel::new(8);
    registry.connect(1, a.clone());
    assert_eq!(registry.with_connected(1, || "ran"), Some("ran"));

    let mut cleaned = false;
    assert!(registry.disconnect_with(1, a.id(), || cleaned = true));
    assert!(cleaned);
}
