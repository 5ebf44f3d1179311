//! The session engine: operation layer above the store.
//!
//! Persists first, broadcasts after commit. Broadcast is best-effort — a
//! lost fan-out never corrupts durable state, reconnecting clients re-fetch
//! the authoritative history.

use std::sync::Arc;

use {async_trait::async_trait, tracing::info};

use {
    meshdesk_common::{Error, Result},
    meshdesk_tokens::Tokenizer,
    meshdesk_widgets::ChatWidget,
};

use crate::{
    store::{AppendMessage, Appended, SessionStore},
    types::{AuthorType, ChatMessage, ChatSession, MessageType, SessionStatus, Ticket},
};

/// Longest accepted message body, in characters.
const MAX_CONTENT_CHARS: usize = 16_000;

/// Delivery seam towards the connection manager. The engine stays oblivious
/// to sockets and pub/sub; the gateway adapts its connection manager to this
/// trait.
#[async_trait]
pub trait SessionBroadcast: Send + Sync {
    /// A message committed; fan it out to the session's connections.
    /// `origin_conn` is the authoring connection, for `self`-echo tagging.
    async fn message_created(
        &self,
        session: &ChatSession,
        message: &ChatMessage,
        origin_conn: Option<&str>,
    );

    /// Session state or assignment changed.
    async fn session_updated(&self, session: &ChatSession);

    /// An agent was assigned; emitted alongside the session update.
    async fn session_assigned(&self, session: &ChatSession, agent_id: &str);
}

/// No-op broadcaster for tests and offline tooling.
pub struct NoopBroadcast;

#[async_trait]
impl SessionBroadcast for NoopBroadcast {
    async fn message_created(&self, _: &ChatSession, _: &ChatMessage, _: Option<&str>) {}
    async fn session_updated(&self, _: &ChatSession) {}
    async fn session_assigned(&self, _: &ChatSession, _: &str) {}
}

/// What a visitor supplies when opening the widget.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct VisitorInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Result of a successful initiation.
#[derive(Debug, Clone)]
pub struct InitiateResult {
    pub session: ChatSession,
    pub ticket: Ticket,
    pub visitor_token: String,
}

pub struct SessionEngine {
    store: SessionStore,
    tokenizer: Arc<Tokenizer>,
    broadcast: Arc<dyn SessionBroadcast>,
    visitor_token_ttl_secs: i64,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        store: SessionStore,
        tokenizer: Arc<Tokenizer>,
        broadcast: Arc<dyn SessionBroadcast>,
        visitor_token_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            tokenizer,
            broadcast,
            visitor_token_ttl_secs,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ── Initiation ───────────────────────────────────────────────────────────

    /// Open a session through a widget. The gateway resolves the widget and
    /// its domain's verification state; the engine owns the admission rules.
    pub async fn initiate(
        &self,
        widget: &ChatWidget,
        domain_verified: bool,
        visitor: VisitorInfo,
    ) -> Result<InitiateResult> {
        if !widget.is_active {
            return Err(Error::forbidden("widget is inactive"));
        }
        if !domain_verified {
            return Err(Error::forbidden("domain not allowed"));
        }
        let email = visitor.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
        if widget.require_email && email.is_none() {
            return Err(Error::invalid("email is required to start a chat"));
        }

        let display_name = visitor
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or(email)
            .unwrap_or("Visitor")
            .to_string();
        let subject = format!("Chat with {display_name}");

        let (session, ticket) = self
            .store
            .create_session(
                &widget.tenant_id,
                &widget.project_id,
                &widget.id,
                email,
                &display_name,
                &subject,
            )
            .await?;

        let visitor_token =
            self.tokenizer
                .issue_visitor(&session.tenant_id, &session.id, self.visitor_token_ttl_secs);

        info!(
            tenant_id = %session.tenant_id,
            session_id = %session.id,
            ticket_id = %ticket.id,
            widget_id = %widget.id,
            "chat session initiated"
        );
        // Surface the new session on agent dashboards.
        self.broadcast.session_updated(&session).await;

        Ok(InitiateResult {
            session,
            ticket,
            visitor_token,
        })
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub async fn send_visitor_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        content: &str,
        origin_conn: Option<&str>,
    ) -> Result<ChatMessage> {
        let content = validate_content(content)?;
        let session = self.store.get_session(tenant_id, session_id).await?;
        let appended = self
            .store
            .append_message(tenant_id, session_id, AppendMessage {
                author_type: AuthorType::Visitor,
                author_id: Some(session.customer_id.clone()),
                author_name: session.customer_name.clone(),
                content,
                message_type: MessageType::Text,
                is_private: false,
            })
            .await?;
        self.fan_out(&appended, origin_conn).await;
        Ok(appended.message)
    }

    pub async fn send_agent_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        agent_id: &str,
        agent_name: &str,
        content: &str,
        is_private: bool,
        origin_conn: Option<&str>,
    ) -> Result<ChatMessage> {
        let content = validate_content(content)?;
        let appended = self
            .store
            .append_message(tenant_id, session_id, AppendMessage {
                author_type: AuthorType::Agent,
                author_id: Some(agent_id.to_string()),
                author_name: agent_name.to_string(),
                content,
                message_type: MessageType::Text,
                is_private,
            })
            .await?;
        self.fan_out(&appended, origin_conn).await;
        Ok(appended.message)
    }

    async fn fan_out(&self, appended: &Appended, origin_conn: Option<&str>) {
        self.broadcast
            .message_created(&appended.session, &appended.message, origin_conn)
            .await;
        if appended.session_reactivated {
            self.broadcast.session_updated(&appended.session).await;
        }
    }

    pub async fn get_messages(
        &self,
        tenant_id: &str,
        session_id: &str,
        after: Option<&str>,
        limit: i64,
        include_private: bool,
    ) -> Result<Vec<ChatMessage>> {
        // Resolve the session first so an unknown id maps to NotFound rather
        // than an empty list.
        self.store.get_session(tenant_id, session_id).await?;
        self.store
            .list_messages(tenant_id, session_id, after, limit, include_private)
            .await
    }

    // ── Read receipts ────────────────────────────────────────────────────────

    pub async fn mark_visitor_read(
        &self,
        tenant_id: &str,
        session_id: &str,
        up_to_message_id: &str,
    ) -> Result<u64> {
        self.store
            .mark_visitor_read(tenant_id, session_id, up_to_message_id)
            .await
    }

    pub async fn mark_agent_read(
        &self,
        tenant_id: &str,
        session_id: &str,
        up_to_message_id: &str,
    ) -> Result<u64> {
        self.store
            .mark_agent_read(tenant_id, session_id, up_to_message_id)
            .await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub async fn assign_agent(
        &self,
        tenant_id: &str,
        session_id: &str,
        agent_id: &str,
    ) -> Result<ChatSession> {
        let session = self.store.assign_agent(tenant_id, session_id, agent_id).await?;
        info!(
            tenant_id = %tenant_id,
            session_id = %session_id,
            agent_id = %agent_id,
            status = session.status.as_str(),
            "agent assigned"
        );
        self.broadcast.session_assigned(&session, agent_id).await;
        self.broadcast.session_updated(&session).await;
        Ok(session)
    }

    pub async fn end_session(&self, tenant_id: &str, session_id: &str) -> Result<ChatSession> {
        let before = self.store.get_session(tenant_id, session_id).await?;
        let session = self.store.end_session(tenant_id, session_id).await?;
        if before.status != SessionStatus::Ended {
            info!(tenant_id = %tenant_id, session_id = %session_id, "session ended");
            self.broadcast.session_updated(&session).await;
        }
        Ok(session)
    }

    /// One sweep pass: park idle sessions and broadcast each transition.
    /// Returns how many sessions moved.
    pub async fn sweep_inactive(&self, inactivity_ms: i64) -> Result<usize> {
        let cutoff = meshdesk_common::now_ms() - inactivity_ms;
        let moved = self.store.sweep_inactive(cutoff).await?;
        for session in &moved {
            info!(
                tenant_id = %session.tenant_id,
                session_id = %session.id,
                "session idle, parked as waiting"
            );
            self.broadcast.session_updated(session).await;
        }
        Ok(moved.len())
    }
}

fn validate_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("message content must not be empty"));
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(Error::invalid("message content too long"));
    }
    Ok(trimmed.to_string())
}
