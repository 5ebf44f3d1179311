//! In-process fabric backend.
//!
//! A [`MemoryHub`] plays the role of the external broker: every
//! [`MemoryPubSub`] handle connected to the same hub sees everything the
//! others publish on channels it subscribed to. Tests connect two handles to
//! one hub to exercise cross-server fan-out without a running Redis.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::Result,
    pubsub::{Cache, PubSub, PubSubMessage},
};

// ── Pub/sub hub ──────────────────────────────────────────────────────────────

struct Node {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<PubSubMessage>,
}

/// The broker. Cheap to clone via `Arc`; hand one to every instance under
/// test.
#[derive(Default)]
pub struct MemoryHub {
    nodes: Mutex<HashMap<u64, Node>>,
    next_node: AtomicU64,
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect a new instance handle to this hub.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> MemoryPubSub {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_node.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.insert(id, Node {
                channels: HashSet::new(),
                tx,
            });
        }
        MemoryPubSub {
            hub: Arc::clone(self),
            node_id: id,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// One instance's handle onto a [`MemoryHub`].
pub struct MemoryPubSub {
    hub: Arc<MemoryHub>,
    node_id: u64,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PubSubMessage>>>,
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let Ok(mut nodes) = self.hub.nodes.lock() else {
            return Ok(());
        };
        // Dead receivers are pruned on delivery failure.
        nodes.retain(|_, node| {
            if !node.channels.contains(channel) {
                return true;
            }
            node.tx
                .send(PubSubMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        if let Ok(mut nodes) = self.hub.nodes.lock()
            && let Some(node) = nodes.get_mut(&self.node_id)
        {
            node.channels.insert(channel.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if let Ok(mut nodes) = self.hub.nodes.lock()
            && let Some(node) = nodes.get_mut(&self.node_id)
        {
            node.channels.remove(channel);
        }
        Ok(())
    }

    async fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<PubSubMessage>> {
        self.rx.lock().ok()?.take()
    }
}

impl Drop for MemoryPubSub {
    fn drop(&mut self) {
        if let Ok(mut nodes) = self.hub.nodes.lock() {
            nodes.remove(&self.node_id);
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

enum Value {
    Str(String),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// TTL'd in-process cache. Expiry is lazy: entries are dropped when touched
/// past their deadline, which is enough for connection-record semantics.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), Entry {
                value: Value::Str(value.to_string()),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(None);
        };
        match entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::Set(_) => Ok(None),
            },
            Some(_) => {
                entries.remove(key);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(key)
            && entry.live()
        {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str, ttl_secs: u64) -> Result<()> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(());
        };
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        match entries.get_mut(key) {
            Some(entry) if entry.live() => {
                if let Value::Set(set) = &mut entry.value {
                    set.insert(member.to_string());
                }
                entry.expires_at = deadline;
            },
            _ => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                entries.insert(key.to_string(), Entry {
                    value: Value::Set(set),
                    expires_at: deadline,
                });
            },
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(key)
            && let Value::Set(set) = &mut entry.value
        {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let Ok(mut entries) = self.entries.lock() else {
            return Ok(vec![]);
        };
        match entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                Value::Set(set) => {
                    let mut members: Vec<String> = set.iter().cloned().collect();
                    members.sort();
                    Ok(members)
                },
                Value::Str(_) => Ok(vec![]),
            },
            Some(_) => {
                entries.remove(key);
                Ok(vec![])
            },
            None => Ok(vec![]),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribed_nodes_only() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let mut a_rx = a.take_messages().await.unwrap();
        let mut b_rx = b.take_messages().await.unwrap();

        a.subscribe("chat:session:s1").await.unwrap();

        b.publish("chat:session:s1", "hello").await.unwrap();

        let msg = a_rx.recv().await.unwrap();
        assert_eq!(msg.channel, "chat:session:s1");
        assert_eq!(msg.payload, "hello");
        // b never subscribed, so nothing is pending for it.
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publisher_also_receives_when_subscribed() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let mut rx = a.take_messages().await.unwrap();
        a.subscribe("c").await.unwrap();
        a.publish("c", "x").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, "x");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let mut rx = a.take_messages().await.unwrap();
        a.subscribe("c").await.unwrap();
        a.unsubscribe("c").await.unwrap();
        a.publish("c", "x").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_channel_order_is_preserved() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let mut rx = a.take_messages().await.unwrap();
        a.subscribe("c").await.unwrap();
        for i in 0..10 {
            a.publish("c", &i.to_string()).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap().payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn take_messages_is_single_consumer() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        assert!(a.take_messages().await.is_some());
        assert!(a.take_messages().await.is_none());
    }

    #[tokio::test]
    async fn cache_set_get_del() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".into()));
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sets_add_remove_and_expire() {
        let cache = MemoryCache::new();
        cache.sadd("s", "a", 60).await.unwrap();
        cache.sadd("s", "b", 60).await.unwrap();
        assert_eq!(cache.smembers("s").await.unwrap(), vec!["a", "b"]);

        cache.srem("s", "a").await.unwrap();
        assert_eq!(cache.smembers("s").await.unwrap(), vec!["b"]);

        cache.sadd("t", "x", 0).await.unwrap();
        assert!(cache.smembers("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expire_refreshes_live_entries_only() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", 0).await.unwrap();
        cache.expire("k", 60).await.unwrap();
        // Already past deadline when expire ran; still gone.
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
