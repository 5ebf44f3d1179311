use {async_trait::async_trait, tokio::sync::mpsc};

use crate::error::Result;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Broadcast fabric between server instances.
///
/// One handle belongs to one server instance. Subscriptions change
/// dynamically as connections attach and detach; all deliveries arrive on a
/// single receiver owned by that instance's listener task. Per-channel
/// publisher order is preserved.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Take the delivery stream. Single consumer: the first call returns the
    /// receiver, later calls return `None`.
    async fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<PubSubMessage>>;
}

/// Shared key-value cache with per-key TTL and string sets.
///
/// Keys follow the documented layout (`connection:{id}`,
/// `session:{id}:connections`); every key embeds ids that are themselves
/// tenant-scoped, so no cross-tenant key collisions are possible.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Refresh a key's TTL without touching the value. No-op for absent keys.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Add a member to a set and refresh the set's TTL.
    async fn sadd(&self, key: &str, member: &str, ttl_secs: u64) -> Result<()>;

    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}
