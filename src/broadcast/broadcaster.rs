use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::envelope::PushEnvelope;
use crate::telemetry::{Category, NormalizedReading, TelemetryStore};

/// Number of history entries included in the init envelope
pub const INIT_HISTORY_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of one live subscriber connection.
///
/// Dropping it (or calling [`Subscription::close`]) marks the subscriber as
/// gone; the broadcaster removes it on its next delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next envelope, or `None` once the broadcaster dropped this subscriber.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Fans update envelopes out to every live subscriber.
///
/// Each subscriber owns a bounded queue fed with `try_send`, so a slow
/// connection can never hold up delivery to the others. A subscriber whose
/// queue is closed or full is evicted.
pub struct Broadcaster {
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<String>>>,
    store: Arc<RwLock<TelemetryStore>>,
    default_category: Category,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("default_category", &self.default_category)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    pub fn new(
        store: Arc<RwLock<TelemetryStore>>,
        default_category: Category,
        queue_capacity: usize,
    ) -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            store,
            default_category,
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a subscriber and queues its init envelope.
    ///
    /// The store read guard is taken first and held until the subscriber is
    /// registered. The ingestion pipeline publishes while it still holds the
    /// store write guard, so every reading is either part of the init payload
    /// or delivered as an update, never both.
    pub async fn join(&self) -> Subscription {
        let store = self.store.read().await;
        let mut subscribers = self.subscribers.lock().await;

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::channel(self.queue_capacity);

        let init = {
            let latest = store.latest();
            let history = store.history(self.default_category, INIT_HISTORY_LEN);
            PushEnvelope::Init {
                data: latest.as_ref(),
                history: &history,
            }
            .to_text()
        };

        match init {
            Ok(text) => {
                if let Err(e) = tx.try_send(text) {
                    warn!(subscriber = %id, error = %e, "Failed to queue init envelope");
                }
            }
            Err(e) => error!(subscriber = %id, error = %e, "Failed to encode init envelope"),
        }

        subscribers.insert(id, tx);
        info!(subscriber = %id, subscribers = subscribers.len(), "Subscriber joined");

        Subscription { id, receiver }
    }

    pub async fn leave(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, subscribers = subscribers.len(), "Subscriber left");
        }
        removed
    }

    /// Sends an update envelope for `reading` to every open subscriber and
    /// returns how many received it.
    pub async fn publish(&self, reading: &NormalizedReading) -> usize {
        let envelope = PushEnvelope::Update {
            timestamp: Utc::now(),
            data: reading,
        };
        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(topic = %reading.topic, error = %e, "Failed to encode update envelope");
                return 0;
            }
        };

        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, tx) in subscribers.iter() {
            if tx.is_closed() {
                evicted.push(*id);
                continue;
            }

            match tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "Subscriber queue full, evicting stalled subscriber");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }

        for id in &evicted {
            subscribers.remove(id);
            debug!(subscriber = %id, "Subscriber evicted");
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                subscribers = subscribers.len(),
                "Removed closed subscribers"
            );
        }

        delivered
    }

    /// Open subscribers; closed ones awaiting eviction are not counted.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .await
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Drops every subscriber queue. Receivers see the end of their stream.
    pub async fn close_all(&self) {
        let mut subscribers = self.subscribers.lock().await;
        let count = subscribers.len();
        subscribers.clear();
        info!(closed = count, "Closed all subscriber connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::RawMessage;
    use crate::telemetry::normalize;
    use serde_json::Value;

    fn setup(queue_capacity: usize) -> (Arc<RwLock<TelemetryStore>>, Broadcaster) {
        let store = Arc::new(RwLock::new(TelemetryStore::new(50)));
        let broadcaster = Broadcaster::new(store.clone(), Category::Temperature, queue_capacity);
        (store, broadcaster)
    }

    fn reading(topic: &str, payload: &str) -> NormalizedReading {
        normalize(&RawMessage::new(topic, payload))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn join_sends_init_with_latest_and_recent_history() {
        let (store, broadcaster) = setup(8);
        {
            let mut store = store.write().await;
            for i in 0..15 {
                store.ingest(reading("iot/sensors/temperature", &format!(r#"{{"seq":{i}}}"#)));
            }
            store.ingest(reading("iot/sensors/humidity", r#"{"seq":99}"#));
        }

        let mut subscription = broadcaster.join().await;
        let init = parse(&subscription.recv().await.unwrap());

        assert_eq!(init["type"], "init");
        assert_eq!(init["data"]["seq"], 99);
        let history = init["history"].as_array().unwrap();
        assert_eq!(history.len(), INIT_HISTORY_LEN);
        assert_eq!(history[0]["seq"], 5);
        assert_eq!(history[9]["seq"], 14);
    }

    #[tokio::test]
    async fn join_on_empty_store_sends_null_data() {
        let (_store, broadcaster) = setup(8);
        let mut subscription = broadcaster.join().await;
        let init = parse(&subscription.recv().await.unwrap());

        assert!(init["data"].is_null());
        assert_eq!(init["history"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_affect_the_others() {
        let (_store, broadcaster) = setup(8);
        let mut subs = vec![
            broadcaster.join().await,
            broadcaster.join().await,
            broadcaster.join().await,
        ];
        for sub in subs.iter_mut() {
            sub.recv().await.unwrap();
        }

        let first = reading("iot/sensors/temperature", r#"{"seq":1}"#);
        assert_eq!(broadcaster.publish(&first).await, 3);

        let received: Vec<String> = {
            let mut out = Vec::new();
            for sub in subs.iter_mut() {
                out.push(sub.recv().await.unwrap());
            }
            out
        };
        assert!(received.iter().all(|text| text == &received[0]));
        assert_eq!(parse(&received[0])["type"], "update");

        let closed = subs.remove(1);
        drop(closed);
        assert_eq!(broadcaster.subscriber_count().await, 2);

        let second = reading("iot/sensors/temperature", r#"{"seq":2}"#);
        assert_eq!(broadcaster.publish(&second).await, 2);
        for sub in subs.iter_mut() {
            let update = parse(&sub.recv().await.unwrap());
            assert_eq!(update["data"]["seq"], 2);
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_is_evicted_without_blocking() {
        let (_store, broadcaster) = setup(2);
        let mut healthy = broadcaster.join().await;
        let _stalled = broadcaster.join().await;
        healthy.recv().await.unwrap();

        // the stalled queue already holds its init envelope
        for seq in 0..3 {
            let r = reading("iot/sensors/humidity", &format!(r#"{{"seq":{seq}}}"#));
            broadcaster.publish(&r).await;
            healthy.recv().await.unwrap();
        }

        assert_eq!(broadcaster.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn leave_and_close_all() {
        let (_store, broadcaster) = setup(4);
        let a = broadcaster.join().await;
        let mut b = broadcaster.join().await;

        assert!(broadcaster.leave(a.id()).await);
        assert!(!broadcaster.leave(a.id()).await);
        assert_eq!(broadcaster.subscriber_count().await, 1);

        broadcaster.close_all().await;
        b.recv().await.unwrap(); // init
        assert_eq!(b.recv().await, None);
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
