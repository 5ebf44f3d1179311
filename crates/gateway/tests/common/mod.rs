#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]
//! Shared harness: spawns one or more gateway instances against a common
//! database and in-process fabric, so tests exercise real HTTP and
//! WebSocket traffic across "servers".

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    sqlx::SqlitePool,
    tokio::net::TcpListener,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
    },
};

use {
    meshdesk_config::Config,
    meshdesk_fabric::{Cache, MemoryCache, MemoryHub, PubSub},
    meshdesk_gateway::{AppState, build_router, server::build_state},
    meshdesk_protocol::Envelope,
    meshdesk_widgets::{ChatWidget, NewWidget},
};

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }
}

pub struct Cluster {
    pub servers: Vec<TestServer>,
    pub pool: SqlitePool,
    // Holds the temp dir open for the life of the cluster.
    _db_dir: tempfile::TempDir,
}

/// Spawn `n` gateway instances sharing one database file and one fabric hub.
pub async fn spawn_cluster(n: usize) -> Cluster {
    let db_dir = tempfile::tempdir().unwrap();
    let db_url = format!(
        "sqlite://{}?mode=rwc",
        db_dir.path().join("meshdesk-test.db").display()
    );
    let pool = SqlitePool::connect(&db_url).await.unwrap();
    meshdesk_gateway::run_migrations(&pool).await.unwrap();

    let hub = MemoryHub::new();
    let cache = MemoryCache::new();
    let config = Arc::new(Config::default());

    let mut servers = Vec::with_capacity(n);
    for _ in 0..n {
        let state = build_state(
            Arc::clone(&config),
            pool.clone(),
            Arc::new(hub.connect()) as Arc<dyn PubSub>,
            Arc::clone(&cache) as Arc<dyn Cache>,
        )
        .await;
        let router = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        servers.push(TestServer { addr, state });
    }

    Cluster {
        servers,
        pool,
        _db_dir: db_dir,
    }
}

/// Seed a tenant, project, verified domain, and active widget.
pub async fn seed_widget(state: &AppState, tenant: &str, project: &str, domain: &str) -> ChatWidget {
    let directory = &state.directory;
    directory.seed_tenant(tenant, "Test Tenant").await.unwrap();
    directory.seed_project(tenant, project, "Test Project").await.unwrap();

    let registered = state
        .domains
        .start_verification(tenant, project, domain)
        .await
        .unwrap();
    state.domains.mark_verified(tenant, domain).await.unwrap();

    let new: NewWidget = serde_json::from_value(serde_json::json!({
        "name": "Main widget",
        "domain_id": registered.id,
    }))
    .unwrap();
    state.widgets.create(tenant, project, new).await.unwrap()
}

/// Seed an agent with a role on the project and hand back `(id, bearer)`.
pub async fn seed_agent(
    state: &AppState,
    tenant: &str,
    project: &str,
    email: &str,
    role: meshdesk_gateway::directory::Role,
) -> (String, String) {
    let agent_id = state
        .directory
        .seed_agent(tenant, email, "Test Agent")
        .await
        .unwrap();
    state
        .directory
        .seed_role(tenant, &agent_id, project, role)
        .await
        .unwrap();
    let token = state.tokenizer.issue_agent(tenant, &agent_id, email, 3600);
    (agent_id, token)
}

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn ws_connect(url: &str) -> WsClient {
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Send one envelope frame.
pub async fn ws_send(socket: &mut WsClient, envelope: &serde_json::Value) {
    socket
        .send(Message::Text(envelope.to_string().into()))
        .await
        .unwrap();
}

/// Read frames until one matches the predicate, skipping pings and
/// duplicates. Panics after the timeout.
pub async fn ws_expect<F>(socket: &mut WsClient, mut matches: F) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let msg = socket.next().await.expect("socket closed").unwrap();
            let Message::Text(text) = msg else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<Envelope>(text.as_str()) else {
                continue;
            };
            if matches(&envelope) {
                return envelope;
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

/// Initiate a session through the public endpoint; returns the parsed body.
pub async fn initiate_session(
    client: &reqwest::Client,
    server: &TestServer,
    widget_id: &str,
) -> serde_json::Value {
    let response = client
        .post(server.url(&format!("/public/chat/widgets/{widget_id}/initiate")))
        .json(&serde_json::json!({"name": "Ada", "email": "ada@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}
