//! Periodic inactivity sweeper.
//!
//! Advances `active → waiting` for sessions whose last activity is older
//! than the configured threshold. Runs as one task per server instance; the
//! transition itself is an idempotent conditional update, so overlapping
//! sweeps from several instances are harmless.

use std::{sync::Arc, time::Duration};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::engine::SessionEngine;

pub struct InactivitySweeper {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl InactivitySweeper {
    /// Spawn the sweep loop. `inactivity_secs` is how long a session may sit
    /// silent before parking; `sweep_secs` is the pass interval.
    #[must_use]
    pub fn spawn(engine: Arc<SessionEngine>, inactivity_secs: i64, sweep_secs: u64) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {},
                }
                match engine.sweep_inactive(inactivity_secs * 1000).await {
                    Ok(0) => {},
                    Ok(moved) => debug!(moved, "inactivity sweep parked sessions"),
                    Err(e) => warn!(error = %e, "inactivity sweep failed"),
                }
            }
        });
        Self { handle, cancel }
    }

    /// Stop the loop and wait for the in-flight pass to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            engine::{NoopBroadcast, SessionEngine, VisitorInfo},
            store::SessionStore,
        },
        meshdesk_tokens::Tokenizer,
        sqlx::SqlitePool,
    };

    #[tokio::test]
    async fn sweeper_parks_idle_sessions() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SessionStore::init(&pool).await.unwrap();
        let engine = Arc::new(SessionEngine::new(
            SessionStore::new(pool),
            Arc::new(Tokenizer::new(b"secret".to_vec())),
            Arc::new(NoopBroadcast),
            3600,
        ));

        let widget: meshdesk_widgets::ChatWidget = serde_json::from_value(serde_json::json!({
            "id": "w1", "tenant_id": "t1", "project_id": "p1", "domain_id": "d1",
            "name": "Main", "shape": "rounded", "bubble_style": "modern", "size": "medium",
            "position": "bottom-right", "primary_color": "#4f46e5", "agent_name": "Support",
            "agent_avatar": null, "welcome_message": "Hi", "offline_message": "Away",
            "auto_open_delay_secs": 0, "allow_file_uploads": false, "sound_enabled": true,
            "require_email": false, "ai_assist": false, "show_powered_by": true,
            "is_active": true, "created_at": 0, "updated_at": 0,
        }))
        .unwrap();
        let result = engine.initiate(&widget, true, VisitorInfo::default()).await.unwrap();

        // Zero inactivity threshold: the session is idle immediately.
        let sweeper = InactivitySweeper::spawn(Arc::clone(&engine), -1, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.shutdown().await;

        let session = engine
            .store()
            .get_session("t1", &result.session.id)
            .await
            .unwrap();
        assert_eq!(session.status, crate::types::SessionStatus::Waiting);
    }
}
