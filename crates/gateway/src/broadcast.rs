//! Adapts the connection manager (and notification dispatcher) to the
//! session engine's broadcast seam.
//!
//! Channel choice is the audience control: public session traffic rides the
//! session channel, private agent notes and dashboard updates ride the
//! tenant's agent-global channel, which no visitor connection ever joins.

use std::sync::Arc;

use {async_trait::async_trait, tracing::warn};

use {
    meshdesk_common::now_ms,
    meshdesk_connections::ConnectionManager,
    meshdesk_notify::NotificationDispatcher,
    meshdesk_protocol::{DeliveryType, Envelope, FromType, agent_global_session, event},
    meshdesk_sessions::{AuthorType, ChatMessage, ChatSession, SessionBroadcast},
};

pub struct ManagerBroadcast {
    manager: Arc<ConnectionManager>,
    notifications: Arc<NotificationDispatcher>,
}

impl ManagerBroadcast {
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        notifications: Arc<NotificationDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            notifications,
        })
    }
}

fn from_type(author: AuthorType) -> FromType {
    match author {
        AuthorType::Visitor => FromType::Visitor,
        AuthorType::Agent => FromType::Agent,
        AuthorType::AiAgent => FromType::AiAgent,
        AuthorType::System => FromType::System,
    }
}

#[async_trait]
impl SessionBroadcast for ManagerBroadcast {
    async fn message_created(
        &self,
        session: &ChatSession,
        message: &ChatMessage,
        origin_conn: Option<&str>,
    ) {
        let envelope = Envelope::new(event::CHAT_MESSAGE, &session.id, message.created_at)
            .with_data(serde_json::to_value(message).unwrap_or_default())
            .with_from(from_type(message.author_type))
            .with_delivery(DeliveryType::Broadcast);

        if message.is_private {
            // Agent-only audience: the session channel carries visitor
            // sockets, so private notes fan out on the agent-global channel
            // with the real session id in the envelope.
            self.manager
                .broadcast_to_session(
                    &agent_global_session(&session.tenant_id),
                    &envelope,
                    origin_conn,
                )
                .await;
        } else {
            self.manager
                .broadcast_to_session(&session.id, &envelope, origin_conn)
                .await;
        }

        // Wake the assigned agent for visitor traffic; durable row first,
        // push best-effort.
        if message.author_type == AuthorType::Visitor
            && let Some(agent_id) = session.assigned_agent_id.as_deref()
        {
            let payload = serde_json::json!({
                "session_id": session.id,
                "message_id": message.id,
                "author_name": message.author_name,
            });
            if let Err(e) = self
                .notifications
                .notify(&session.tenant_id, agent_id, event::CHAT_MESSAGE, payload)
                .await
            {
                warn!(
                    tenant_id = %session.tenant_id,
                    agent_id,
                    error = %e,
                    "visitor-message notification failed"
                );
            }
        }
    }

    async fn session_updated(&self, session: &ChatSession) {
        let envelope = Envelope::new(event::SESSION_UPDATE, &session.id, now_ms())
            .with_data(serde_json::to_value(session).unwrap_or_default())
            .with_from(FromType::System)
            .with_delivery(DeliveryType::Broadcast);

        // Participants of the session and every agent dashboard in the
        // tenant.
        self.manager.broadcast_to_session(&session.id, &envelope, None).await;
        self.manager
            .broadcast_to_session(&agent_global_session(&session.tenant_id), &envelope, None)
            .await;
    }

    async fn session_assigned(&self, session: &ChatSession, agent_id: &str) {
        let envelope = Envelope::new(event::SESSION_ASSIGNED, &session.id, now_ms())
            .with_data(serde_json::json!({
                "session": session,
                "assigned_agent_id": agent_id,
            }))
            .with_from(FromType::System)
            .with_delivery(DeliveryType::Broadcast);

        self.manager.broadcast_to_session(&session.id, &envelope, None).await;
        self.manager
            .broadcast_to_session(&agent_global_session(&session.tenant_id), &envelope, None)
            .await;

        let payload = serde_json::json!({"session_id": session.id});
        if let Err(e) = self
            .notifications
            .notify(&session.tenant_id, agent_id, event::SESSION_ASSIGNED, payload)
            .await
        {
            warn!(
                tenant_id = %session.tenant_id,
                agent_id,
                error = %e,
                "assignment notification failed"
            );
        }
    }
}
