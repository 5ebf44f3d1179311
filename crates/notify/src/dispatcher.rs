use std::sync::Arc;

use tracing::debug;

use {
    meshdesk_common::{Result, now_ms},
    meshdesk_connections::ConnectionManager,
    meshdesk_protocol::{DeliveryType, Envelope, agent_global_session, event},
};

use crate::store::{Notification, NotificationStore};

/// Persists a notification, then attempts a live wake-up on every
/// agent-global connection the target agent holds anywhere in the cluster.
pub struct NotificationDispatcher {
    store: NotificationStore,
    manager: Arc<ConnectionManager>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(store: NotificationStore, manager: Arc<ConnectionManager>) -> Self {
        Self { store, manager }
    }

    #[must_use]
    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    /// Persist and push. The push is best-effort: a dead or missing
    /// connection only costs the wake-up, the row already exists.
    pub async fn notify(
        &self,
        tenant_id: &str,
        agent_id: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Notification> {
        let notification = self.store.insert(tenant_id, agent_id, kind, payload).await?;

        let envelope = Envelope::new(event::NOTIFICATION, "", now_ms())
            .with_data(serde_json::to_value(&notification).unwrap_or_default())
            .with_delivery(DeliveryType::Direct);

        let mut pushed = 0usize;
        for conn_id in self
            .manager
            .session_connections(&agent_global_session(tenant_id))
            .await
        {
            let Some(meta) = self.manager.lookup_meta(&conn_id).await else {
                continue;
            };
            if meta.tenant_id == tenant_id && meta.user_id.as_deref() == Some(agent_id) {
                self.manager.send_to_connection(&conn_id, &envelope).await;
                pushed += 1;
            }
        }
        debug!(
            tenant_id,
            agent_id,
            kind,
            pushed,
            notification_id = %notification.id,
            "notification dispatched"
        );
        Ok(notification)
    }
}
