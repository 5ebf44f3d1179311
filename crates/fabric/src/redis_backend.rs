//! Redis-backed fabric for multi-server deployments.
//!
//! The cache rides a [`ConnectionManager`] (auto-reconnecting multiplexed
//! connection). Pub/sub needs its own dedicated connection; a pump task
//! forwards the subscription stream into the instance's delivery channel and
//! re-subscribes everything after a broker reconnect.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::StreamExt,
    redis::{AsyncCommands, Client, aio::ConnectionManager},
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    pubsub::{Cache, PubSub, PubSubMessage},
};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

// ── Cache ────────────────────────────────────────────────────────────────────

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        Ok(con.get(key).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str, ttl_secs: u64) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.sadd(key, member).await?;
        let _: () = con.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        Ok(con.smembers(key).await?)
    }
}

// ── Pub/sub ──────────────────────────────────────────────────────────────────

pub struct RedisPubSub {
    manager: ConnectionManager,
    sink: Arc<Mutex<redis::aio::PubSubSink>>,
    channels: Arc<Mutex<HashSet<String>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PubSubMessage>>>,
}

impl RedisPubSub {
    /// Open the publisher connection and the dedicated subscriber connection,
    /// and start the pump task.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        let (sink, mut stream) = client.get_async_pubsub().await?.split();

        let sink = Arc::new(Mutex::new(sink));
        let channels: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let pump_sink = Arc::clone(&sink);
        let pump_channels = Arc::clone(&channels);
        tokio::spawn(async move {
            let mut backoff = RECONNECT_BACKOFF;
            loop {
                while let Some(msg) = stream.next().await {
                    backoff = RECONNECT_BACKOFF;
                    let channel = msg.get_channel_name().to_string();
                    let payload: String = msg.get_payload().unwrap_or_default();
                    if tx.send(PubSubMessage { channel, payload }).is_err() {
                        // Listener is gone; the instance is shutting down.
                        return;
                    }
                }

                warn!("redis pub/sub stream closed, reconnecting");
                loop {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    match client.get_async_pubsub().await {
                        Ok(pubsub) => {
                            let (mut new_sink, new_stream) = pubsub.split();
                            let subscribed = pump_channels.lock().await.clone();
                            let mut ok = true;
                            for channel in &subscribed {
                                if let Err(e) = new_sink.subscribe(channel).await {
                                    warn!(channel, error = %e, "resubscribe failed");
                                    ok = false;
                                    break;
                                }
                            }
                            if ok {
                                debug!(channels = subscribed.len(), "redis pub/sub reconnected");
                                *pump_sink.lock().await = new_sink;
                                stream = new_stream;
                                break;
                            }
                        },
                        Err(e) => warn!(error = %e, "redis pub/sub reconnect failed"),
                    }
                }
            }
        });

        Ok(Self {
            manager,
            sink,
            channels,
            rx: Mutex::new(Some(rx)),
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.channels.lock().await.insert(channel.to_string());
        self.sink
            .lock()
            .await
            .subscribe(channel)
            .await
            .map_err(Error::from)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.channels.lock().await.remove(channel);
        self.sink
            .lock()
            .await
            .unsubscribe(channel)
            .await
            .map_err(Error::from)
    }

    async fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<PubSubMessage>> {
        self.rx.lock().await.take()
    }
}
