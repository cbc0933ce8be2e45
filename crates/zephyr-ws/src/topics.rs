//! Topic-based publish/subscribe between connections.
//!
//! A [`TopicRegistry`] is owned by a dispatcher, so two servers in one
//! process never see each other's topics. Clones share the same map.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::message::Message;

/// Topic name to subscribed connections.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<DashMap<String, HashMap<ConnectionId, Connection>>>,
}

/// Snapshot of a registry's size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Subscriptions across all topics.
    pub subscriptions: usize,
}

impl TopicRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `connection` to `topic`. Returns false if it already was.
    pub fn subscribe(&self, topic: &str, connection: &Connection) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection.id(), connection.clone())
            .is_none()
    }

    /// Unsubscribes `id` from `topic`. Returns false if it was not
    /// subscribed.
    pub fn unsubscribe(&self, topic: &str, id: ConnectionId) -> bool {
        let removed = self
            .topics
            .get_mut(topic)
            .is_some_and(|mut subscribers| subscribers.remove(&id).is_some());
        self.topics
            .remove_if(topic, |_, subscribers| subscribers.is_empty());
        removed
    }

    /// Sends `message` to every subscriber of `topic` and returns how many
    /// received it. Subscribers whose transport is gone are dropped.
    pub fn publish(&self, topic: &str, message: &Message) -> usize {
        let subscribers: Vec<Connection> = match self.topics.get(topic) {
            Some(subscribers) => subscribers.values().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for connection in subscribers {
            if connection.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(topic, connection = %connection.id(), "dropping closed subscriber");
                self.unsubscribe(topic, connection.id());
            }
        }
        delivered
    }

    /// Removes `id` from every topic. Returns the number of subscriptions
    /// removed.
    pub fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut removed = 0;
        self.topics.retain(|_, subscribers| {
            if subscribers.remove(&id).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Returns the number of subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |s| s.len())
    }

    /// Returns the topics `id` is subscribed to, sorted.
    pub fn topics_of(&self, id: ConnectionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|entry| entry.value().contains_key(&id))
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    /// Returns current counts.
    pub fn stats(&self) -> TopicStats {
        self.topics.iter().fold(TopicStats::default(), |mut stats, entry| {
            stats.topics += 1;
            stats.subscriptions += entry.value().len();
            stats
        })
    }
}
