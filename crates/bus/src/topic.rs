use crate::error::BusError;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use truemid_core::messages::BusMessage;
use uuid::Uuid;

/// Per-subscriber backlog cap. Beyond this the topic drops new messages for
/// the lagging subscriber instead of growing without bound.
pub const MAX_TOPIC_BACKLOG: usize = 100_000;

struct SubscriberSlot<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
    warned: bool,
}

/// A named topic with independent per-subscriber queues.
///
/// `publish` fans out to every live subscriber under a short lock. Dropping
/// a [`Subscription`] removes it from the topic and releases its backlog.
pub struct MemoryTopic<T> {
    name: &'static str,
    subscribers: Mutex<HashMap<Uuid, SubscriberSlot<T>>>,
}

impl<T: BusMessage> MemoryTopic<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn fan_out(&self, message: T) {
        let mut subscribers = self.subscribers.lock().expect("topic lock poisoned");
        let mut dead = Vec::new();
        for (id, slot) in subscribers.iter_mut() {
            if slot.depth.load(Ordering::Relaxed) >= MAX_TOPIC_BACKLOG {
                if !slot.warned {
                    warn!(topic = self.name, subscriber = %id, "Subscriber backlog full, dropping messages");
                    slot.warned = true;
                }
                continue;
            }
            slot.warned = false;
            if slot.tx.send(message.clone()).is_ok() {
                slot.depth.fetch_add(1, Ordering::Relaxed);
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }
    }

    fn add_subscriber(self: &Arc<Self>) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();
        self.subscribers
            .lock()
            .expect("topic lock poisoned")
            .insert(
                id,
                SubscriberSlot {
                    tx,
                    depth: Arc::clone(&depth),
                    warned: false,
                },
            );
        debug!(topic = self.name, subscriber = %id, "New subscriber");
        Subscription {
            id,
            topic: Arc::clone(self),
            rx,
            depth,
            unacked: 0,
        }
    }

    fn remove_subscriber(&self, id: Uuid) {
        self.subscribers
            .lock()
            .expect("topic lock poisoned")
            .remove(&id);
        debug!(topic = self.name, subscriber = %id, "Subscriber closed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("topic lock poisoned").len()
    }
}

/// An independent view of one topic's messages.
pub struct Subscription<T: BusMessage> {
    id: Uuid,
    topic: Arc<MemoryTopic<T>>,
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
    unacked: usize,
}

impl<T: BusMessage> Subscription<T> {
    /// Wait for the next message. Returns `None` only if the topic itself
    /// was dropped.
    pub async fn recv(&mut self) -> Option<T> {
        let message = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.unacked += 1;
        Some(message)
    }

    /// Take a message if one is immediately available.
    pub fn try_recv(&mut self) -> Option<T> {
        let message = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.unacked += 1;
        Some(message)
    }

    /// Acknowledge the message most recently consumed.
    pub fn ack(&mut self) {
        self.unacked = self.unacked.saturating_sub(1);
    }

    /// Messages consumed but not yet acked.
    pub fn pending_acks(&self) -> usize {
        self.unacked
    }
}

impl<T: BusMessage> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.topic.remove_subscriber(self.id);
    }
}

enum Publisher {
    Local,
    Redis {
        conn: ConnectionManager,
        stream_key: &'static str,
    },
}

/// Handle to one typed topic of the message bus.
#[derive(Clone)]
pub struct TopicHandle<T: BusMessage> {
    local: Arc<MemoryTopic<T>>,
    publisher: Arc<Publisher>,
}

impl<T: BusMessage> TopicHandle<T> {
    pub fn memory(name: &'static str) -> Self {
        Self {
            local: Arc::new(MemoryTopic::new(name)),
            publisher: Arc::new(Publisher::Local),
        }
    }

    pub(crate) fn redis(name: &'static str, stream_key: &'static str, conn: ConnectionManager) -> Self {
        Self {
            local: Arc::new(MemoryTopic::new(name)),
            publisher: Arc::new(Publisher::Redis { conn, stream_key }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.local.name
    }

    /// Publish a message. In-process publish cannot fail; the stream-backed
    /// variant returns once the backend acknowledged the append.
    pub async fn publish(&self, message: T) -> Result<(), BusError> {
        match &*self.publisher {
            Publisher::Local => {
                self.local.fan_out(message);
                Ok(())
            }
            Publisher::Redis { conn, stream_key } => {
                let payload = serde_json::to_string(&message)?;
                let mut conn = conn.clone();
                redis::cmd("XADD")
                    .arg(*stream_key)
                    .arg("*")
                    .arg("json")
                    .arg(payload)
                    .query_async::<_, String>(&mut conn)
                    .await?;
                Ok(())
            }
        }
    }

    /// Deliver a message to local subscribers only. Used by the stream
    /// readers to loop backend entries back in.
    pub(crate) fn publish_local(&self, message: T) {
        self.local.fan_out(message);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.local.add_subscriber()
    }

    pub fn subscriber_count(&self) -> usize {
        self.local.subscriber_count()
    }
}
