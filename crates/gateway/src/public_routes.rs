//! Public, unauthenticated surface: health, widget discovery, chat
//! initiation, visitor messaging, and magic-link ticket access.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use {
    meshdesk_common::Error,
    meshdesk_sessions::{ChatMessage, Ticket, TicketMessage, VisitorInfo},
    meshdesk_widgets::ChatWidget,
};

use crate::{
    auth::VisitorAuth,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_PAGE: i64 = 200;

// ── Health ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub server_id: String,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        server_id: state.manager.server_id().to_string(),
    })
}

// ── Widget discovery ─────────────────────────────────────────────────────────

/// Widget configs embeddable on a hostname. Unknown or unverified domains
/// read as 404 — the embed script treats that as "no widget here".
pub async fn widgets_by_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<Vec<ChatWidget>>> {
    let widgets = state.widgets.lookup_by_domain(&domain).await?;
    if widgets.is_empty() {
        return Err(Error::not_found("no widget for this domain").into());
    }
    Ok(Json(widgets))
}

// ── Initiation ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct InitiateResponse {
    pub session_id: String,
    pub ticket_id: String,
    pub visitor_token: String,
    pub welcome_message: String,
    pub widget_config: ChatWidget,
}

pub async fn initiate(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    Json(visitor): Json<VisitorInfo>,
) -> ApiResult<Json<InitiateResponse>> {
    let widget = state.widgets.get_public(&widget_id).await?;
    let domain_verified = state.domains.is_verified_id(&widget.domain_id).await?;
    let result = state.engine.initiate(&widget, domain_verified, visitor).await?;

    Ok(Json(InitiateResponse {
        session_id: result.session.id,
        ticket_id: result.ticket.id,
        visitor_token: result.visitor_token,
        welcome_message: widget.welcome_message.clone(),
        widget_config: widget,
    }))
}

// ── Visitor messaging ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendMessage {
    pub content: String,
}

pub async fn visitor_send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    VisitorAuth(claims): VisitorAuth,
    Json(body): Json<SendMessage>,
) -> ApiResult<Json<ChatMessage>> {
    ensure_session_token(&claims.session_id, &session_id)?;
    let message = state
        .engine
        .send_visitor_message(&claims.tenant_id, &session_id, &body.content, None)
        .await?;
    Ok(Json(message))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct MessagesQuery {
    pub after: Option<String>,
    pub limit: Option<i64>,
}

/// Authoritative history for the widget, e.g. after a reconnect.
pub async fn visitor_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    VisitorAuth(claims): VisitorAuth,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    ensure_session_token(&claims.session_id, &session_id)?;
    let messages = state
        .engine
        .get_messages(
            &claims.tenant_id,
            &session_id,
            query.after.as_deref(),
            query.limit.unwrap_or(DEFAULT_PAGE),
            false,
        )
        .await?;
    Ok(Json(messages))
}

#[derive(Serialize)]
pub struct ReadResponse {
    pub marked: u64,
}

pub async fn visitor_mark_read(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
    VisitorAuth(claims): VisitorAuth,
) -> ApiResult<Json<ReadResponse>> {
    ensure_session_token(&claims.session_id, &session_id)?;
    let marked = state
        .engine
        .mark_visitor_read(&claims.tenant_id, &session_id, &message_id)
        .await?;
    Ok(Json(ReadResponse { marked }))
}

fn ensure_session_token(token_session: &str, path_session: &str) -> Result<(), ApiError> {
    if token_session != path_session {
        return Err(Error::unauthenticated("token does not match session").into());
    }
    Ok(())
}

// ── Magic-link ticket access ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PublicTicket {
    pub ticket: Ticket,
}

pub async fn magic_ticket(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<PublicTicket>> {
    let claims = state.tokenizer.verify_magic_link(&token)?;
    claims.require_read()?;
    let ticket = state
        .engine
        .store()
        .get_ticket(&claims.tenant_id, &claims.ticket_id)
        .await?;
    Ok(Json(PublicTicket { ticket }))
}

pub async fn magic_ticket_messages(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Vec<TicketMessage>>> {
    let claims = state.tokenizer.verify_magic_link(&token)?;
    claims.require_read()?;
    let messages = state
        .engine
        .store()
        .list_ticket_messages(&claims.tenant_id, &claims.ticket_id, false)
        .await?;
    Ok(Json(messages))
}

pub async fn magic_ticket_append(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<SendMessage>,
) -> ApiResult<Json<TicketMessage>> {
    let claims = state.tokenizer.verify_magic_link(&token)?;
    claims.require_write()?;
    let content = body.content.trim();
    if content.is_empty() {
        return Err(Error::invalid("message content must not be empty").into());
    }
    let message = state
        .engine
        .store()
        .append_ticket_message(&claims.tenant_id, &claims.ticket_id, &claims.customer_id, content)
        .await?;
    Ok(Json(message))
}
