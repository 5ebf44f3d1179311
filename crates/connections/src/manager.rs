use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::{Mutex, RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    meshdesk_common::{new_id, now_ms},
    meshdesk_fabric::{Cache, PubSub},
    meshdesk_protocol::{
        CONNECTION_TTL_SECS, Envelope, HEARTBEAT_INTERVAL_SECS, SESSION_SET_TTL_SECS, DeliveryType,
        connection_channel, connection_key, event, parse_connection_channel,
        parse_session_channel, session_channel, session_connections_key,
    },
};

/// Which side of the conversation a socket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnKind {
    Visitor,
    Agent,
}

/// The cache-resident connection record. The socket itself lives in process
/// memory of the instance stamped in `server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMeta {
    pub conn_id: String,
    pub session_id: String,
    pub kind: ConnKind,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub server_id: String,
    pub connected_at: i64,
    pub last_ping_at: i64,
}

/// A socket owned by this instance. Frames go out through `sender`; a single
/// writer task drains the channel, so frames never interleave.
struct LocalConnection {
    meta: ConnectionMeta,
    sessions: HashSet<String>,
    sender: mpsc::UnboundedSender<String>,
    last_pong: Instant,
}

pub struct ConnectionManager {
    server_id: String,
    conns: RwLock<HashMap<String, LocalConnection>>,
    pubsub: Arc<dyn PubSub>,
    cache: Arc<dyn Cache>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(server_id: String, pubsub: Arc<dyn PubSub>, cache: Arc<dyn Cache>) -> Arc<Self> {
        Arc::new(Self {
            server_id,
            conns: RwLock::new(HashMap::new()),
            pubsub,
            cache,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Start the pub/sub listener and the heartbeat timer. Call once.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;

        if let Some(mut rx) = self.pubsub.take_messages().await {
            let manager = Arc::clone(self);
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                    };
                    manager.dispatch(&msg.channel, &msg.payload).await;
                }
                debug!("pub/sub listener stopped");
            }));
        }

        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so fresh connections
            // are not pinged the moment the server starts.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {},
                }
                manager.heartbeat_pass().await;
            }
        }));
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register a socket. `session_key` is the initial subscription: a real
    /// session id for visitors, the agent-global pseudo-session for agents.
    /// Returns the fresh connection id.
    pub async fn add_connection(
        &self,
        kind: ConnKind,
        tenant_id: &str,
        user_id: Option<&str>,
        session_key: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> String {
        let conn_id = new_id();
        let now = now_ms();
        let meta = ConnectionMeta {
            conn_id: conn_id.clone(),
            session_id: session_key.to_string(),
            kind,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(Into::into),
            server_id: self.server_id.clone(),
            connected_at: now,
            last_ping_at: now,
        };

        {
            let mut conns = self.conns.write().await;
            conns.insert(conn_id.clone(), LocalConnection {
                meta: meta.clone(),
                sessions: HashSet::from([session_key.to_string()]),
                sender,
                last_pong: Instant::now(),
            });
        }

        if let Err(e) = self.pubsub.subscribe(&connection_channel(&conn_id)).await {
            warn!(conn_id = %conn_id, error = %e, "connection channel subscribe failed");
        }
        self.subscribe_channel(session_key).await;
        self.write_meta(&meta).await;
        if let Err(e) = self
            .cache
            .sadd(&session_connections_key(session_key), &conn_id, SESSION_SET_TTL_SECS)
            .await
        {
            warn!(conn_id = %conn_id, error = %e, "session set update failed");
        }

        info!(
            conn_id = %conn_id,
            tenant_id = %tenant_id,
            session = %session_key,
            kind = ?kind,
            "connection registered"
        );
        conn_id
    }

    /// Attach an existing connection to another session (agent
    /// `session_subscribe`).
    pub async fn subscribe_session(&self, conn_id: &str, session_id: &str) -> bool {
        {
            let mut conns = self.conns.write().await;
            let Some(conn) = conns.get_mut(conn_id) else {
                return false;
            };
            if !conn.sessions.insert(session_id.to_string()) {
                return true;
            }
        }
        self.subscribe_channel(session_id).await;
        if let Err(e) = self
            .cache
            .sadd(&session_connections_key(session_id), conn_id, SESSION_SET_TTL_SECS)
            .await
        {
            warn!(conn_id, session_id, error = %e, "session set update failed");
        }
        true
    }

    /// Detach a connection from a session (agent `session_unsubscribe`).
    pub async fn unsubscribe_session(&self, conn_id: &str, session_id: &str) {
        let removed = {
            let mut conns = self.conns.write().await;
            match conns.get_mut(conn_id) {
                Some(conn) => conn.sessions.remove(session_id),
                None => false,
            }
        };
        if !removed {
            return;
        }
        self.release_channel(session_id).await;
        if let Err(e) = self.cache.srem(&session_connections_key(session_id), conn_id).await {
            warn!(conn_id, session_id, error = %e, "session set removal failed");
        }
    }

    /// Remove a connection: local map, cache record, session sets, channel
    /// subscriptions. The dropped sender ends the socket's writer task.
    pub async fn remove_connection(&self, conn_id: &str) {
        let removed = { self.conns.write().await.remove(conn_id) };
        let Some(conn) = removed else {
            return;
        };

        if let Err(e) = self.pubsub.unsubscribe(&connection_channel(conn_id)).await {
            debug!(conn_id, error = %e, "connection channel unsubscribe failed");
        }
        if let Err(e) = self.cache.del(&connection_key(conn_id)).await {
            warn!(conn_id, error = %e, "connection record delete failed");
        }
        for session_id in &conn.sessions {
            self.release_channel(session_id).await;
            if let Err(e) = self.cache.srem(&session_connections_key(session_id), conn_id).await {
                warn!(conn_id, session_id, error = %e, "session set removal failed");
            }
        }

        info!(
            conn_id,
            duration_ms = now_ms() - conn.meta.connected_at,
            "connection removed"
        );
    }

    /// Subscribe to a session channel unless some local connection already
    /// holds it subscribed.
    async fn subscribe_channel(&self, session_key: &str) {
        if let Err(e) = self.pubsub.subscribe(&session_channel(session_key)).await {
            warn!(session = %session_key, error = %e, "session channel subscribe failed");
        }
    }

    /// Drop the channel subscription once no local connection needs it.
    async fn release_channel(&self, session_key: &str) {
        let still_used = {
            let conns = self.conns.read().await;
            conns.values().any(|c| c.sessions.contains(session_key))
        };
        if still_used {
            return;
        }
        if let Err(e) = self.pubsub.unsubscribe(&session_channel(session_key)).await {
            debug!(session = %session_key, error = %e, "session channel unsubscribe failed");
        }
    }

    // ── Delivery ─────────────────────────────────────────────────────────────

    /// Fan an envelope out to every connection of a session, cluster-wide.
    ///
    /// The local instance delivers immediately (the author's own socket gets
    /// a `self` echo); the pub/sub copy reaches every instance including this
    /// one, and clients dedupe by message id.
    pub async fn broadcast_to_session(
        &self,
        session_key: &str,
        envelope: &Envelope,
        origin_conn: Option<&str>,
    ) {
        self.deliver_local(session_key, envelope, origin_conn).await;

        let Ok(json) = serde_json::to_string(envelope) else {
            warn!(session = %session_key, "envelope serialization failed");
            return;
        };
        if let Err(e) = self.pubsub.publish(&session_channel(session_key), &json).await {
            warn!(session = %session_key, error = %e, "session broadcast publish failed");
        }
        if let Err(e) = self
            .cache
            .expire(&session_connections_key(session_key), SESSION_SET_TTL_SECS)
            .await
        {
            debug!(session = %session_key, error = %e, "session set ttl refresh failed");
        }
    }

    /// Deliver to one specific connection, wherever its socket lives.
    pub async fn send_to_connection(&self, conn_id: &str, envelope: &Envelope) {
        let Ok(json) = serde_json::to_string(envelope) else {
            return;
        };
        let delivered_locally = {
            let conns = self.conns.read().await;
            match conns.get(conn_id) {
                Some(conn) => conn.sender.send(json.clone()).is_ok(),
                None => false,
            }
        };
        if delivered_locally {
            return;
        }
        if let Err(e) = self.pubsub.publish(&connection_channel(conn_id), &json).await {
            warn!(conn_id, error = %e, "unicast publish failed");
        }
    }

    /// Optimistic local delivery for a session, with `self` tagging.
    async fn deliver_local(&self, session_key: &str, envelope: &Envelope, origin_conn: Option<&str>) {
        let self_json = origin_conn.and_then(|_| {
            let mut echo = envelope.clone();
            echo.delivery_type = Some(DeliveryType::SelfEcho);
            serde_json::to_string(&echo).ok()
        });
        let Ok(json) = serde_json::to_string(envelope) else {
            return;
        };

        // Capture targets under the read lock, write outside it.
        let targets: Vec<(String, mpsc::UnboundedSender<String>)> = {
            let conns = self.conns.read().await;
            conns
                .values()
                .filter(|c| c.sessions.contains(session_key))
                .map(|c| (c.meta.conn_id.clone(), c.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (conn_id, sender) in targets {
            let frame = match (&self_json, origin_conn) {
                (Some(echo), Some(origin)) if conn_id == origin => echo,
                _ => &json,
            };
            if sender.send(frame.clone()).is_err() {
                dead.push(conn_id);
            }
        }
        for conn_id in dead {
            debug!(conn_id = %conn_id, "evicting connection with closed sender");
            self.remove_connection(&conn_id).await;
        }
    }

    /// Pub/sub dispatch: session channels fan out to subscribed local
    /// connections, connection channels unicast to the owned socket.
    async fn dispatch(&self, channel: &str, payload: &str) {
        if let Some(session_key) = parse_session_channel(channel) {
            let targets: Vec<(String, mpsc::UnboundedSender<String>)> = {
                let conns = self.conns.read().await;
                conns
                    .values()
                    .filter(|c| c.sessions.contains(session_key))
                    .map(|c| (c.meta.conn_id.clone(), c.sender.clone()))
                    .collect()
            };
            let mut dead = Vec::new();
            for (conn_id, sender) in targets {
                if sender.send(payload.to_string()).is_err() {
                    dead.push(conn_id);
                }
            }
            for conn_id in dead {
                self.remove_connection(&conn_id).await;
            }
        } else if let Some(conn_id) = parse_connection_channel(channel) {
            let failed = {
                let conns = self.conns.read().await;
                match conns.get(conn_id) {
                    Some(conn) => conn.sender.send(payload.to_string()).is_err(),
                    None => false,
                }
            };
            if failed {
                self.remove_connection(conn_id).await;
            }
        } else {
            debug!(channel, "ignoring message on unknown channel");
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────────────────

    /// Record a client pong (or any traffic counting as liveness) and refresh
    /// the cache record's TTL.
    pub async fn record_pong(&self, conn_id: &str) {
        let meta = {
            let mut conns = self.conns.write().await;
            match conns.get_mut(conn_id) {
                Some(conn) => {
                    conn.last_pong = Instant::now();
                    conn.meta.last_ping_at = now_ms();
                    Some(conn.meta.clone())
                },
                None => None,
            }
        };
        if let Some(meta) = meta {
            self.write_meta(&meta).await;
        }
    }

    /// One heartbeat pass: ping every local socket, evict the ones whose
    /// sender is gone or whose last pong is older than the connection TTL.
    pub async fn heartbeat_pass(&self) {
        let ping = Envelope::new(event::PING, "", now_ms());
        let Ok(ping_json) = serde_json::to_string(&ping) else {
            return;
        };
        let ttl = Duration::from_secs(CONNECTION_TTL_SECS);

        let targets: Vec<(String, mpsc::UnboundedSender<String>, Instant)> = {
            let conns = self.conns.read().await;
            conns
                .values()
                .map(|c| (c.meta.conn_id.clone(), c.sender.clone(), c.last_pong))
                .collect()
        };

        for (conn_id, sender, last_pong) in targets {
            let stale = last_pong.elapsed() > ttl;
            if stale || sender.send(ping_json.clone()).is_err() {
                info!(conn_id = %conn_id, stale, "heartbeat evicting connection");
                self.remove_connection(&conn_id).await;
                continue;
            }
            if let Err(e) = self.cache.expire(&connection_key(&conn_id), CONNECTION_TTL_SECS).await
            {
                debug!(conn_id = %conn_id, error = %e, "connection ttl refresh failed");
            }
        }
    }

    async fn write_meta(&self, meta: &ConnectionMeta) {
        let Ok(json) = serde_json::to_string(meta) else {
            return;
        };
        if let Err(e) = self
            .cache
            .set_ex(&connection_key(&meta.conn_id), &json, CONNECTION_TTL_SECS)
            .await
        {
            warn!(conn_id = %meta.conn_id, error = %e, "connection record write failed");
        }
    }

    // ── Introspection ────────────────────────────────────────────────────────

    pub async fn connection_count(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn connection_meta(&self, conn_id: &str) -> Option<ConnectionMeta> {
        self.conns.read().await.get(conn_id).map(|c| c.meta.clone())
    }

    /// Live agent-global connection ids of one agent on this instance.
    pub async fn agent_connections(&self, tenant_id: &str, agent_id: &str) -> Vec<String> {
        let conns = self.conns.read().await;
        conns
            .values()
            .filter(|c| {
                c.meta.kind == ConnKind::Agent
                    && c.meta.tenant_id == tenant_id
                    && c.meta.user_id.as_deref() == Some(agent_id)
            })
            .map(|c| c.meta.conn_id.clone())
            .collect()
    }

    /// Cluster-wide connection ids attached to a session, from the cache.
    pub async fn session_connections(&self, session_key: &str) -> Vec<String> {
        self.cache
            .smembers(&session_connections_key(session_key))
            .await
            .unwrap_or_default()
    }

    /// Resolve a connection record wherever it lives: the local map first,
    /// then the shared cache for connections owned by other instances.
    pub async fn lookup_meta(&self, conn_id: &str) -> Option<ConnectionMeta> {
        if let Some(meta) = self.connection_meta(conn_id).await {
            return Some(meta);
        }
        let json = self.cache.get(&connection_key(conn_id)).await.ok()??;
        serde_json::from_str(&json).ok()
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Cancel the listener and heartbeat, close every socket, and delete this
    /// instance's cache records. Whatever survives expires by TTL.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let drained: Vec<(String, HashSet<String>)> = {
            let mut conns = self.conns.write().await;
            conns
                .drain()
                .map(|(id, conn)| (id, conn.sessions))
                .collect()
        };
        for (conn_id, sessions) in drained {
            if let Err(e) = self.cache.del(&connection_key(&conn_id)).await {
                debug!(conn_id = %conn_id, error = %e, "cache cleanup failed during shutdown");
            }
            for session_id in sessions {
                let _ = self.cache.srem(&session_connections_key(&session_id), &conn_id).await;
            }
        }
        info!(server_id = %self.server_id, "connection manager shut down");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        meshdesk_fabric::{MemoryCache, MemoryHub},
        meshdesk_protocol::agent_global_session,
    };

    async fn manager(
        hub: &Arc<MemoryHub>,
        cache: &Arc<MemoryCache>,
        server_id: &str,
    ) -> Arc<ConnectionManager> {
        let manager = ConnectionManager::new(
            server_id.to_string(),
            Arc::new(hub.connect()),
            Arc::clone(cache) as Arc<dyn Cache>,
        );
        manager.start().await;
        manager
    }

    fn socket() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    async fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Envelope {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn local_broadcast_tags_self_echo() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx1, mut rx1) = socket();
        let (tx2, mut rx2) = socket();
        let visitor = m.add_connection(ConnKind::Visitor, "t1", None, "s1", tx1).await;
        let _agent = m
            .add_connection(ConnKind::Agent, "t1", Some("a1"), "s1", tx2)
            .await;

        let envelope = Envelope::new(event::CHAT_MESSAGE, "s1", now_ms())
            .with_delivery(DeliveryType::Broadcast);
        m.broadcast_to_session("s1", &envelope, Some(&visitor)).await;

        // Optimistic local copy: origin gets `self`, the other `broadcast`.
        let first = recv_json(&mut rx1).await;
        assert_eq!(first.delivery_type, Some(DeliveryType::SelfEcho));
        let second = recv_json(&mut rx2).await;
        assert_eq!(second.delivery_type, Some(DeliveryType::Broadcast));

        // The pub/sub copy arrives as a duplicate for client-side dedupe.
        let dup = recv_json(&mut rx1).await;
        assert_eq!(dup.delivery_type, Some(DeliveryType::Broadcast));
    }

    #[tokio::test]
    async fn broadcast_crosses_instances() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let a = manager(&hub, &cache, "srv-a").await;
        let b = manager(&hub, &cache, "srv-b").await;

        let (tx_visitor, _rx_visitor) = socket();
        a.add_connection(ConnKind::Visitor, "t1", None, "s1", tx_visitor).await;

        let (tx_agent, mut rx_agent) = socket();
        let agent = b
            .add_connection(ConnKind::Agent, "t1", Some("a1"), agent_global_session("t1").as_str(), tx_agent)
            .await;
        assert!(b.subscribe_session(&agent, "s1").await);

        let envelope = Envelope::new(event::CHAT_MESSAGE, "s1", now_ms())
            .with_delivery(DeliveryType::Broadcast);
        a.broadcast_to_session("s1", &envelope, None).await;

        let received = recv_json(&mut rx_agent).await;
        assert_eq!(received.r#type, event::CHAT_MESSAGE);
        assert_eq!(received.session_id, "s1");
    }

    #[tokio::test]
    async fn unicast_reaches_remote_connection() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let a = manager(&hub, &cache, "srv-a").await;
        let b = manager(&hub, &cache, "srv-b").await;

        let (tx, mut rx) = socket();
        let conn = b
            .add_connection(ConnKind::Agent, "t1", Some("a1"), &agent_global_session("t1"), tx)
            .await;

        let envelope =
            Envelope::new(event::NOTIFICATION, "", now_ms()).with_delivery(DeliveryType::Direct);
        a.send_to_connection(&conn, &envelope).await;

        let received = recv_json(&mut rx).await;
        assert_eq!(received.r#type, event::NOTIFICATION);
        assert_eq!(received.delivery_type, Some(DeliveryType::Direct));
    }

    #[tokio::test]
    async fn session_sets_track_cluster_membership() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let a = manager(&hub, &cache, "srv-a").await;
        let b = manager(&hub, &cache, "srv-b").await;

        let (tx1, _rx1) = socket();
        let c1 = a.add_connection(ConnKind::Visitor, "t1", None, "s1", tx1).await;
        let (tx2, _rx2) = socket();
        let c2 = b.add_connection(ConnKind::Agent, "t1", Some("a1"), "s1", tx2).await;

        let mut members = a.session_connections("s1").await;
        members.sort();
        let mut expected = vec![c1.clone(), c2.clone()];
        expected.sort();
        assert_eq!(members, expected);

        b.remove_connection(&c2).await;
        assert_eq!(a.session_connections("s1").await, vec![c1]);
    }

    #[tokio::test]
    async fn heartbeat_evicts_closed_and_stale_connections() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx_dead, rx_dead) = socket();
        let dead = m.add_connection(ConnKind::Visitor, "t1", None, "s1", tx_dead).await;
        drop(rx_dead);

        let (tx_live, mut rx_live) = socket();
        let live = m.add_connection(ConnKind::Visitor, "t1", None, "s2", tx_live).await;

        m.heartbeat_pass().await;

        assert!(m.connection_meta(&dead).await.is_none());
        assert!(m.connection_meta(&live).await.is_some());
        assert_eq!(cache.get(&connection_key(&dead)).await.unwrap(), None);
        // The live socket got the ping frame.
        let ping = recv_json(&mut rx_live).await;
        assert_eq!(ping.r#type, event::PING);
    }

    #[tokio::test]
    async fn record_pong_keeps_connection_alive() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx, _rx) = socket();
        let conn = m.add_connection(ConnKind::Visitor, "t1", None, "s1", tx).await;
        let before = m.connection_meta(&conn).await.unwrap().last_ping_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        m.record_pong(&conn).await;
        let after = m.connection_meta(&conn).await.unwrap().last_ping_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn unsubscribe_stops_session_fanout() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx, mut rx) = socket();
        let conn = m
            .add_connection(ConnKind::Agent, "t1", Some("a1"), &agent_global_session("t1"), tx)
            .await;
        m.subscribe_session(&conn, "s1").await;
        m.unsubscribe_session(&conn, "s1").await;

        let envelope = Envelope::new(event::CHAT_MESSAGE, "s1", now_ms());
        m.broadcast_to_session("s1", &envelope, None).await;
        // Give the pub/sub copy a moment; nothing should arrive either way.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_clears_cache_records() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx, _rx) = socket();
        let conn = m.add_connection(ConnKind::Visitor, "t1", None, "s1", tx).await;
        assert!(cache.get(&connection_key(&conn)).await.unwrap().is_some());

        m.shutdown().await;
        assert_eq!(cache.get(&connection_key(&conn)).await.unwrap(), None);
        assert!(m.session_connections("s1").await.is_empty());
        assert_eq!(m.connection_count().await, 0);
    }

    #[tokio::test]
    async fn agent_connections_filter_by_tenant_and_agent() {
        let hub = MemoryHub::new();
        let cache = MemoryCache::new();
        let m = manager(&hub, &cache, "srv-a").await;

        let (tx1, _r1) = socket();
        let c1 = m
            .add_connection(ConnKind::Agent, "t1", Some("a1"), &agent_global_session("t1"), tx1)
            .await;
        let (tx2, _r2) = socket();
        m.add_connection(ConnKind::Agent, "t1", Some("a2"), &agent_global_session("t1"), tx2)
            .await;
        let (tx3, _r3) = socket();
        m.add_connection(ConnKind::Agent, "t2", Some("a1"), &agent_global_session("t2"), tx3)
            .await;

        assert_eq!(m.agent_connections("t1", "a1").await, vec![c1]);
    }
}
