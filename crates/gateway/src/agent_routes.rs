//! Tenant-scoped surface behind agent bearer auth.
//!
//! Every handler pins the path tenant to the token tenant first, then
//! checks the role contract against the resource's project before touching
//! anything.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use {
    meshdesk_common::Error,
    meshdesk_notify::Notification,
    meshdesk_sessions::{ChatMessage, ChatSession, SessionStatus},
    meshdesk_tokens::Scope,
    meshdesk_widgets::{ChatWidget, NewWidget, UpdateWidget, VerifiedDomain},
};

use crate::{
    auth::AgentAuth,
    directory::AgentContext,
    error::{ApiError, ApiResult},
    public_routes::{MessagesQuery, ReadResponse},
    state::AppState,
};

// ── Domains ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterDomain {
    pub domain: String,
}

pub async fn register_domain(
    State(state): State<AppState>,
    Path((tenant_id, project_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<RegisterDomain>,
) -> ApiResult<Json<VerifiedDomain>> {
    ctx.ensure_tenant(&tenant_id)?;
    require_write(&ctx, &project_id)?;
    let domain = state
        .domains
        .start_verification(&tenant_id, &project_id, &body.domain)
        .await?;
    Ok(Json(domain))
}

pub async fn list_domains(
    State(state): State<AppState>,
    Path((tenant_id, project_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<Vec<VerifiedDomain>>> {
    ctx.ensure_tenant(&tenant_id)?;
    require_read(&ctx, &project_id)?;
    Ok(Json(state.domains.list(&tenant_id, &project_id).await?))
}

pub async fn poll_domain(
    State(state): State<AppState>,
    Path((tenant_id, domain)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<VerifiedDomain>> {
    ctx.ensure_tenant(&tenant_id)?;
    let verified = state.domains.poll_verification(&tenant_id, &domain).await?;
    require_write(&ctx, &verified.project_id)?;
    Ok(Json(verified))
}

// ── Widgets ──────────────────────────────────────────────────────────────────

pub async fn create_widget(
    State(state): State<AppState>,
    Path((tenant_id, project_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<NewWidget>,
) -> ApiResult<Json<ChatWidget>> {
    ctx.ensure_tenant(&tenant_id)?;
    require_write(&ctx, &project_id)?;
    Ok(Json(state.widgets.create(&tenant_id, &project_id, body).await?))
}

pub async fn list_widgets(
    State(state): State<AppState>,
    Path((tenant_id, project_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<Vec<ChatWidget>>> {
    ctx.ensure_tenant(&tenant_id)?;
    require_read(&ctx, &project_id)?;
    Ok(Json(state.widgets.list(&tenant_id, &project_id).await?))
}

pub async fn get_widget(
    State(state): State<AppState>,
    Path((tenant_id, widget_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<ChatWidget>> {
    ctx.ensure_tenant(&tenant_id)?;
    let widget = state.widgets.get(&tenant_id, &widget_id).await?;
    require_read(&ctx, &widget.project_id)?;
    Ok(Json(widget))
}

pub async fn update_widget(
    State(state): State<AppState>,
    Path((tenant_id, widget_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<UpdateWidget>,
) -> ApiResult<Json<ChatWidget>> {
    ctx.ensure_tenant(&tenant_id)?;
    let widget = state.widgets.get(&tenant_id, &widget_id).await?;
    require_write(&ctx, &widget.project_id)?;
    Ok(Json(state.widgets.update(&tenant_id, &widget_id, body).await?))
}

pub async fn delete_widget(
    State(state): State<AppState>,
    Path((tenant_id, widget_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.ensure_tenant(&tenant_id)?;
    let widget = state.widgets.get(&tenant_id, &widget_id).await?;
    require_write(&ctx, &widget.project_id)?;
    state.widgets.delete(&tenant_id, &widget_id).await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SessionsQuery {
    pub status: Option<SessionStatus>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path((tenant_id, project_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Vec<ChatSession>>> {
    ctx.ensure_tenant(&tenant_id)?;
    require_read(&ctx, &project_id)?;
    let sessions = state
        .engine
        .store()
        .list_sessions(&tenant_id, &project_id, query.status)
        .await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<ChatSession>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_read(&ctx, &session.project_id)?;
    Ok(Json(session))
}

pub async fn session_messages(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_read(&ctx, &session.project_id)?;
    let messages = state
        .engine
        .get_messages(
            &tenant_id,
            &session_id,
            query.after.as_deref(),
            query.limit.unwrap_or(200),
            true,
        )
        .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct AgentSendMessage {
    pub content: String,
    #[serde(default)]
    pub is_private: bool,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<AgentSendMessage>,
) -> ApiResult<Json<ChatMessage>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_write(&ctx, &session.project_id)?;
    let message = state
        .engine
        .send_agent_message(
            &tenant_id,
            &session_id,
            &ctx.agent_id,
            &ctx.display_name,
            &body.content,
            body.is_private,
            None,
        )
        .await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub agent_id: String,
}

pub async fn assign_agent(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<ChatSession>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_write(&ctx, &session.project_id)?;
    // The assignee must hold a role on the session's project too.
    let assignee = state.directory.load_context(&tenant_id, &body.agent_id).await
        .map_err(|_| Error::invalid("assignee is not an active agent of this tenant"))?;
    if !assignee.can_write(&session.project_id) {
        return Err(Error::invalid("assignee has no write role on this project").into());
    }
    let session = state.engine.assign_agent(&tenant_id, &session_id, &body.agent_id).await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct AgentReadBody {
    pub up_to_message_id: String,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<AgentReadBody>,
) -> ApiResult<Json<ReadResponse>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_read(&ctx, &session.project_id)?;
    let marked = state
        .engine
        .mark_agent_read(&tenant_id, &session_id, &body.up_to_message_id)
        .await?;
    Ok(Json(ReadResponse { marked }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path((tenant_id, session_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<ChatSession>> {
    ctx.ensure_tenant(&tenant_id)?;
    let session = state.engine.store().get_session(&tenant_id, &session_id).await?;
    require_write(&ctx, &session.project_id)?;
    Ok(Json(state.engine.end_session(&tenant_id, &session_id).await?))
}

// ── Magic links ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MagicLinkBody {
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Serialize)]
pub struct MagicLinkResponse {
    pub token: String,
    pub path: String,
}

pub async fn issue_magic_link(
    State(state): State<AppState>,
    Path((tenant_id, ticket_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
    Json(body): Json<MagicLinkBody>,
) -> ApiResult<Json<MagicLinkResponse>> {
    ctx.ensure_tenant(&tenant_id)?;
    if body.scopes.is_empty() {
        return Err(Error::invalid("at least one scope is required").into());
    }
    let ticket = state.engine.store().get_ticket(&tenant_id, &ticket_id).await?;
    require_write(&ctx, &ticket.project_id)?;

    let ttl = body
        .ttl_secs
        .unwrap_or(state.config.auth.magic_link_ttl_secs)
        .clamp(60, 60 * 60 * 24 * 30);
    let token = state.tokenizer.issue_magic_link(
        &tenant_id,
        &ticket.project_id,
        &ticket.id,
        &ticket.customer_id,
        body.scopes,
        ttl,
    );
    let path = format!("/public/tickets/{token}");
    Ok(Json(MagicLinkResponse { token, path }))
}

// ── Notifications ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct NotificationsQuery {
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    AgentAuth(ctx): AgentAuth,
    Query(query): Query<NotificationsQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    ctx.ensure_tenant(&tenant_id)?;
    let list = state
        .notifications
        .store()
        .list(&tenant_id, &ctx.agent_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(list))
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<UnreadCount>> {
    ctx.ensure_tenant(&tenant_id)?;
    let unread = state
        .notifications
        .store()
        .unread_count(&tenant_id, &ctx.agent_id)
        .await?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path((tenant_id, notification_id)): Path<(String, String)>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.ensure_tenant(&tenant_id)?;
    state
        .notifications
        .store()
        .mark_read(&tenant_id, &ctx.agent_id, &notification_id)
        .await?;
    Ok(Json(serde_json::json!({"read": true})))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    AgentAuth(ctx): AgentAuth,
) -> ApiResult<Json<ReadResponse>> {
    ctx.ensure_tenant(&tenant_id)?;
    let marked = state
        .notifications
        .store()
        .mark_all_read(&tenant_id, &ctx.agent_id)
        .await?;
    Ok(Json(ReadResponse { marked }))
}

// ── Permission helpers ───────────────────────────────────────────────────────

fn require_read(ctx: &AgentContext, project_id: &str) -> Result<(), ApiError> {
    if !ctx.can_read(project_id) {
        return Err(Error::forbidden("no role on this project").into());
    }
    Ok(())
}

fn require_write(ctx: &AgentContext, project_id: &str) -> Result<(), ApiError> {
    if !ctx.can_write(project_id) {
        return Err(Error::forbidden("no write role on this project").into());
    }
    Ok(())
}
