// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-process publish/subscribe over `tokio::sync::broadcast`.
//!
//! One topic per replicated queue. Publishing never blocks; a subscriber that
//! falls more than `capacity` messages behind loses its session.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use rqueue_storage::{PROTOCOL_VERSION, Publisher, ReplicationError, Subscription};
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

/// Topic carrying the replication stream of `queue`. The protocol version is
/// part of the name, so peers speaking different op sets never meet.
pub fn replication_topic(queue: &str) -> String {
    format!("rqueue.replication.v{PROTOCOL_VERSION}.{queue}")
}

#[derive(Debug)]
pub struct Broker {
    capacity: usize,
    topics:   Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics:   Mutex::new(HashMap::new()),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub async fn publisher(&self, topic: &str) -> TopicPublisher {
        TopicPublisher {
            topic: topic.to_string(),
            tx:    self.sender(topic).await,
        }
    }

    /// Subscribe to messages published on `topic` from now on.
    pub async fn subscribe(&self, topic: &str) -> BrokerSubscription {
        BrokerSubscription {
            topic: topic.to_string(),
            rx:    self.sender(topic).await.subscribe(),
        }
    }

    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.topics.lock().await.keys().cloned().collect();
        topics.sort_unstable();
        topics
    }
}

pub struct TopicPublisher {
    topic: String,
    tx:    broadcast::Sender<Bytes>,
}

#[async_trait]
impl Publisher for TopicPublisher {
    async fn publish(&self, record: Bytes) -> Result<(), ReplicationError> {
        if self.tx.send(record).is_err() {
            debug!(topic = %self.topic, "no subscribers, record dropped");
        }
        Ok(())
    }
}

pub struct BrokerSubscription {
    topic: String,
    rx:    broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Subscription for BrokerSubscription {
    async fn recv(&mut self) -> Result<Option<Bytes>, ReplicationError> {
        match self.rx.recv().await {
            Ok(record) => Ok(Some(record)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(ReplicationError::Transport {
                message: format!("subscriber on {} lagged by {skipped} records", self.topic),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broker = Broker::new(8);
        let mut first = broker.subscribe("t").await;
        let mut second = broker.subscribe("t").await;

        broker
            .publisher("t")
            .await
            .publish(Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert_eq!(second.recv().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert_eq!(broker.topics().await, vec!["t"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = Broker::new(8);
        broker
            .publisher("t")
            .await
            .publish(Bytes::from_static(b"lost"))
            .await
            .unwrap();

        let mut late = broker.subscribe("t").await;
        let publisher = broker.publisher("t").await;
        publisher.publish(Bytes::from_static(b"seen")).await.unwrap();
        assert_eq!(late.recv().await.unwrap().unwrap(), Bytes::from_static(b"seen"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_fails() {
        let broker = Broker::new(2);
        let mut slow = broker.subscribe("t").await;
        let publisher = broker.publisher("t").await;
        for i in 0u8..5 {
            publisher.publish(Bytes::from(vec![i])).await.unwrap();
        }

        assert!(matches!(
            slow.recv().await,
            Err(ReplicationError::Transport { .. })
        ));
    }

    #[test]
    fn test_replication_topic() {
        assert_eq!(replication_topic("orders"), "rqueue.replication.v1.orders");
    }
}
