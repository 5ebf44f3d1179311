//! Server wiring and lifecycle: state construction, router, graceful
//! shutdown.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        routing::{get, post},
    },
    sqlx::SqlitePool,
    tower_http::{cors::CorsLayer, trace::TraceLayer},
    tracing::{info, warn},
};

use {
    meshdesk_config::{CacheBackend, Config},
    meshdesk_connections::ConnectionManager,
    meshdesk_fabric::{Cache, MemoryCache, MemoryHub, PubSub, RedisCache, RedisPubSub},
    meshdesk_notify::{NotificationDispatcher, NotificationStore},
    meshdesk_sessions::{InactivitySweeper, SessionEngine, SessionStore},
    meshdesk_tokens::Tokenizer,
    meshdesk_widgets::{DomainValidator, WidgetStore},
};

use crate::{
    agent_routes, broadcast::ManagerBroadcast, directory::AgentDirectory, public_routes,
    state::AppState, ws,
};

/// How long shutdown may spend draining sockets and cache records.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Per-process identifier stamped into cache records so pub/sub can route
/// unicasts to the owning instance.
fn server_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

/// Assemble the full application state on top of an open pool and a chosen
/// fabric backend. Starts the connection manager's background tasks.
pub async fn build_state(
    config: Arc<Config>,
    pool: SqlitePool,
    pubsub: Arc<dyn PubSub>,
    cache: Arc<dyn Cache>,
) -> AppState {
    let tokenizer = Arc::new(Tokenizer::new(config.auth.secret_bytes()));

    let manager = ConnectionManager::new(server_id(), pubsub, cache);
    manager.start().await;

    let notifications = Arc::new(NotificationDispatcher::new(
        NotificationStore::new(pool.clone()),
        Arc::clone(&manager),
    ));
    let broadcast = ManagerBroadcast::new(Arc::clone(&manager), Arc::clone(&notifications));
    let engine = Arc::new(SessionEngine::new(
        SessionStore::new(pool.clone()),
        Arc::clone(&tokenizer),
        broadcast,
        config.auth.visitor_token_ttl_secs,
    ));

    AppState {
        pool: pool.clone(),
        tokenizer,
        engine,
        widgets: Arc::new(WidgetStore::new(pool.clone())),
        domains: Arc::new(DomainValidator::new(pool.clone())),
        manager,
        notifications,
        directory: Arc::new(AgentDirectory::new(pool)),
        config,
    }
}

/// Build the full route tree.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/public/health", get(public_routes::health))
        .route(
            "/public/chat/widgets/domain/{domain}",
            get(public_routes::widgets_by_domain),
        )
        .route(
            "/public/chat/widgets/{widget_id}/initiate",
            post(public_routes::initiate),
        )
        .route(
            "/public/chat/sessions/{session_id}/messages",
            get(public_routes::visitor_messages).post(public_routes::visitor_send_message),
        )
        .route(
            "/public/chat/sessions/{session_id}/messages/{message_id}/read",
            post(public_routes::visitor_mark_read),
        )
        .route("/public/chat/ws/{session_id}", get(ws::visitor_ws))
        .route("/public/tickets/{token}", get(public_routes::magic_ticket))
        .route(
            "/public/tickets/{token}/messages",
            get(public_routes::magic_ticket_messages).post(public_routes::magic_ticket_append),
        );

    let tenant = Router::new()
        .route("/tenants/{tenant_id}/chat/agent/ws", get(ws::agent_ws))
        .route(
            "/tenants/{tenant_id}/projects/{project_id}/domains",
            get(agent_routes::list_domains).post(agent_routes::register_domain),
        )
        .route(
            "/tenants/{tenant_id}/domains/{domain}/verify",
            post(agent_routes::poll_domain),
        )
        .route(
            "/tenants/{tenant_id}/projects/{project_id}/widgets",
            get(agent_routes::list_widgets).post(agent_routes::create_widget),
        )
        .route(
            "/tenants/{tenant_id}/widgets/{widget_id}",
            get(agent_routes::get_widget)
                .put(agent_routes::update_widget)
                .delete(agent_routes::delete_widget),
        )
        .route(
            "/tenants/{tenant_id}/projects/{project_id}/chat/sessions",
            get(agent_routes::list_sessions),
        )
        .route(
            "/tenants/{tenant_id}/chat/sessions/{session_id}",
            get(agent_routes::get_session),
        )
        .route(
            "/tenants/{tenant_id}/chat/sessions/{session_id}/messages",
            get(agent_routes::session_messages).post(agent_routes::send_message),
        )
        .route(
            "/tenants/{tenant_id}/chat/sessions/{session_id}/assign",
            post(agent_routes::assign_agent),
        )
        .route(
            "/tenants/{tenant_id}/chat/sessions/{session_id}/read",
            post(agent_routes::mark_read),
        )
        .route(
            "/tenants/{tenant_id}/chat/sessions/{session_id}/end",
            post(agent_routes::end_session),
        )
        .route(
            "/tenants/{tenant_id}/tickets/{ticket_id}/magic-link",
            post(agent_routes::issue_magic_link),
        )
        .route(
            "/tenants/{tenant_id}/notifications",
            get(agent_routes::list_notifications),
        )
        .route(
            "/tenants/{tenant_id}/notifications/unread-count",
            get(agent_routes::unread_count),
        )
        .route(
            "/tenants/{tenant_id}/notifications/read-all",
            post(agent_routes::mark_all_notifications_read),
        )
        .route(
            "/tenants/{tenant_id}/notifications/{notification_id}/read",
            post(agent_routes::mark_notification_read),
        );

    Router::new()
        .merge(public)
        .merge(tenant)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Open the configured fabric backend.
async fn build_fabric(config: &Config) -> anyhow::Result<(Arc<dyn PubSub>, Arc<dyn Cache>)> {
    match config.cache.backend {
        CacheBackend::Memory => {
            info!("using in-process fabric (single-instance mode)");
            let hub = MemoryHub::new();
            Ok((Arc::new(hub.connect()), MemoryCache::new()))
        },
        CacheBackend::Redis => {
            info!(url = %config.cache.url, "connecting redis fabric");
            let pubsub = RedisPubSub::connect(&config.cache.url).await?;
            let cache = RedisCache::connect(&config.cache.url).await?;
            Ok((Arc::new(pubsub), Arc::new(cache)))
        },
    }
}

/// Run the gateway until SIGINT/SIGTERM, then drain within the shutdown
/// deadline. An incomplete drain is an error so the process exits non-zero.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let pool = SqlitePool::connect(&config.database.url).await?;
    crate::run_migrations(&pool).await?;

    let (pubsub, cache) = build_fabric(&config).await?;
    let state = build_state(Arc::clone(&config), pool, pubsub, cache).await;

    let sweeper = InactivitySweeper::spawn(
        Arc::clone(&state.engine),
        config.chat.inactivity_secs,
        config.chat.sweep_secs,
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, server_id = %state.manager.server_id(), "gateway listening");

    let manager = Arc::clone(&state.manager);
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        sweeper.shutdown().await;
        manager.shutdown().await;
    })
    .await;
    if drained.is_err() {
        warn!(deadline_secs = SHUTDOWN_DEADLINE.as_secs(), "shutdown deadline exceeded");
        anyhow::bail!("sockets did not drain within the shutdown deadline");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
