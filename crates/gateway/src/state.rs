use std::sync::Arc;

use sqlx::SqlitePool;

use {
    meshdesk_config::Config,
    meshdesk_connections::ConnectionManager,
    meshdesk_notify::NotificationDispatcher,
    meshdesk_sessions::SessionEngine,
    meshdesk_tokens::Tokenizer,
    meshdesk_widgets::{DomainValidator, WidgetStore},
};

use crate::directory::AgentDirectory;

/// Shared handler state. Everything is `Arc`'d; the struct clones per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub tokenizer: Arc<Tokenizer>,
    pub engine: Arc<SessionEngine>,
    pub widgets: Arc<WidgetStore>,
    pub domains: Arc<DomainValidator>,
    pub manager: Arc<ConnectionManager>,
    pub notifications: Arc<NotificationDispatcher>,
    pub directory: Arc<AgentDirectory>,
    pub config: Arc<Config>,
}
