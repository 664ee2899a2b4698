//! In-process pub/sub fabric.
//!
//! Backs single-instance deployments and the test suite. Messages travel
//! through the same msgpack envelope a clustered bus would carry, so the
//! encode/decode path is exercised either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Publication;
use crate::pubsub::{
    PubSub, PubSubError, PublishOptions, Replier, SubscribeOptions, Subscription, Unsubscriber,
    Waiter,
};

const SUBSCRIPTION_BUFFER: usize = 1024;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Publication>,
    queue_group: Option<String>,
    replier: Option<Replier>,
}

#[derive(Default)]
struct Topics {
    subscribers: HashMap<String, Vec<Subscriber>>,
    /// Round-robin cursors per (topic, queue group).
    cursors: HashMap<(String, String), usize>,
}

/// A [`PubSub`] implementation living entirely inside the process.
pub struct LocalPubSub {
    topics: Arc<Mutex<Topics>>,
    connected: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            connected: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Pick the delivery set for one publication: every plain subscriber,
    /// plus one member per queue group.
    fn route(&self, topic: &str) -> Vec<(mpsc::Sender<Publication>, Option<Replier>)> {
        let mut topics = self.topics.lock().expect("pubsub lock poisoned");

        let mut grouped: HashMap<String, Vec<usize>> = HashMap::new();
        let mut targets = Vec::new();

        {
            let Some(subscribers) = topics.subscribers.get(topic) else {
                return targets;
            };
            for (index, subscriber) in subscribers.iter().enumerate() {
                match &subscriber.queue_group {
                    None => targets.push((subscriber.tx.clone(), subscriber.replier.clone())),
                    Some(group) => grouped.entry(group.clone()).or_default().push(index),
                }
            }
        }

        let mut picks = Vec::new();
        for (group, members) in grouped {
            let cursor = topics
                .cursors
                .entry((topic.to_string(), group))
                .or_insert(0);
            picks.push(members[*cursor % members.len()]);
            *cursor = cursor.wrapping_add(1);
        }

        if let Some(subscribers) = topics.subscribers.get(topic) {
            for pick in picks {
                let subscriber = &subscribers[pick];
                targets.push((subscriber.tx.clone(), subscriber.replier.clone()));
            }
        }

        targets
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    fn connect(&self) -> Waiter {
        let (ok_tx, ok_rx) = oneshot::channel();
        let (abort_tx, _abort_rx) = oneshot::channel();
        self.connected.store(true, Ordering::SeqCst);
        let _ = ok_tx.send(true);
        Waiter::new(ok_rx, abort_tx)
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        self.connected.store(false, Ordering::SeqCst);
        self.topics.lock().expect("pubsub lock poisoned").subscribers.clear();
        Ok(())
    }

    async fn publish(
        &self,
        publication: Publication,
        options: PublishOptions,
    ) -> Result<(), PubSubError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PubSubError::NotConnected);
        }

        // Round-trip through the wire envelope, like a real bus would.
        let frame = publication.encode()?;
        let delivered = Publication::decode(&frame)?;

        let targets = self.route(&delivered.topic);

        if let Some(validator) = &options.reply_validator {
            let Some((tx, replier)) = targets.into_iter().next() else {
                return Err(PubSubError::Timeout);
            };
            let reply = replier
                .map(|r| r(&delivered))
                .unwrap_or_else(|| b"ack".to_vec());
            if tx.send(delivered).await.is_err() {
                return Err(PubSubError::Timeout);
            }
            return validator(&reply);
        }

        for (tx, _) in targets {
            if tx.try_send(delivered.clone()).is_err() {
                tracing::warn!(topic = %delivered.topic, "Subscriber queue full; publication dropped");
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, options: SubscribeOptions) -> Subscription {
        let (pub_tx, pub_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (_err_tx, err_rx) = mpsc::channel(8);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut topics = self.topics.lock().expect("pubsub lock poisoned");
            topics
                .subscribers
                .entry(topic.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    tx: pub_tx,
                    queue_group: options.queue_group,
                    replier: options.replier,
                });
        }

        let topics = self.topics.clone();
        let topic = topic.to_string();
        let unsubscriber = Unsubscriber::new(move || {
            let mut topics = topics.lock().expect("pubsub lock poisoned");
            if let Some(subscribers) = topics.subscribers.get_mut(&topic) {
                subscribers.retain(|s| s.id != id);
            }
        });

        Subscription {
            publications: pub_rx,
            errors: err_rx,
            unsubscriber,
        }
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), PubSubError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PubSubError::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind};

    fn publication() -> Publication {
        Publication::from_event(
            "events",
            &Event::new(EventKind::Create, "user", serde_json::json!({"ID": "xxx"})),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_before_connect_is_refused() {
        let bus = LocalPubSub::new();
        let err = bus
            .publish(publication(), PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::NotConnected));
    }

    #[tokio::test]
    async fn plain_subscribers_all_receive() {
        let bus = LocalPubSub::new();
        assert!(bus.connect().wait(None).await);

        let mut first = bus.subscribe("events", SubscribeOptions::default());
        let mut second = bus.subscribe("events", SubscribeOptions::default());

        bus.publish(publication(), PublishOptions::default())
            .await
            .unwrap();

        let a = first.publications.recv().await.unwrap();
        let b = second.publications.recv().await.unwrap();
        assert_eq!(a, publication());
        assert_eq!(b, publication());
    }

    #[tokio::test]
    async fn queue_group_delivers_to_one_member() {
        let bus = LocalPubSub::new();
        assert!(bus.connect().wait(None).await);

        let group = SubscribeOptions {
            queue_group: Some("workers".to_string()),
            ..Default::default()
        };
        let mut first = bus.subscribe("events", group.clone());
        let mut second = bus.subscribe("events", group);

        bus.publish(publication(), PublishOptions::default())
            .await
            .unwrap();

        let got_first = first.publications.try_recv().is_ok();
        let got_second = second.publications.try_recv().is_ok();
        assert!(got_first ^ got_second, "exactly one group member receives");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = LocalPubSub::new();
        assert!(bus.connect().wait(None).await);

        let mut sub = bus.subscribe("events", SubscribeOptions::default());
        sub.unsubscriber.unsubscribe();

        bus.publish(publication(), PublishOptions::default())
            .await
            .unwrap();
        assert!(sub.publications.try_recv().is_err());
    }

    #[tokio::test]
    async fn request_response_runs_the_validator() {
        let bus = LocalPubSub::new();
        assert!(bus.connect().wait(None).await);

        let _sub = bus.subscribe(
            "events",
            SubscribeOptions {
                replier: Some(Arc::new(|_publication| b"ok".to_vec())),
                ..Default::default()
            },
        );

        let accepted = bus
            .publish(
                publication(),
                PublishOptions {
                    reply_validator: Some(Arc::new(|reply| {
                        if reply == b"ok" {
                            Ok(())
                        } else {
                            Err(PubSubError::Reply("unexpected".to_string()))
                        }
                    })),
                    timeout: Some(Duration::from_secs(1)),
                },
            )
            .await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn request_response_without_subscriber_times_out() {
        let bus = LocalPubSub::new();
        assert!(bus.connect().wait(None).await);

        let err = bus
            .publish(
                publication(),
                PublishOptions {
                    reply_validator: Some(Arc::new(|_| Ok(()))),
                    timeout: Some(Duration::from_millis(10)),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Timeout));
    }

    #[tokio::test]
    async fn ping_tracks_connection_state() {
        let bus = LocalPubSub::new();
        assert!(bus.ping(Duration::from_millis(10)).await.is_err());
        assert!(bus.connect().wait(Some(Duration::from_secs(1))).await);
        assert!(bus.ping(Duration::from_millis(10)).await.is_ok());
        bus.disconnect().await.unwrap();
        assert!(bus.ping(Duration::from_millis(10)).await.is_err());
    }
}
