//! HTTP/WebSocket surface of the chat delivery core.
//!
//! Public (unauthenticated) routes serve the embedded widget and magic-link
//! ticket views; tenant routes serve the agent application behind bearer
//! auth; two WebSocket endpoints carry the live traffic. Handlers stay thin:
//! they authenticate, authorize, call into the domain crates, and map typed
//! errors onto transport codes.

pub mod agent_routes;
pub mod auth;
pub mod broadcast;
pub mod directory;
pub mod error;
pub mod public_routes;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{build_router, serve},
    state::AppState,
};

/// Run the gateway's database migrations.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> meshdesk_common::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
