//! WebSocket endpoints: the public visitor socket and the agent-global
//! socket.
//!
//! Both follow the same shape: authenticate before upgrading, register with
//! the connection manager, drain inbound envelopes, and let a single writer
//! task own the outbound half so frames never interleave.

use {
    axum::{
        extract::{
            Path, Query, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    meshdesk_common::now_ms,
    meshdesk_connections::ConnKind,
    meshdesk_protocol::{
        DeliveryType, Envelope, FromType, MAX_PAYLOAD_BYTES, agent_global_session, event,
    },
    meshdesk_sessions::ChatSession,
};

use crate::{directory::AgentContext, state::AppState};

#[derive(Deserialize)]
struct ChatData {
    content: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct WsQuery {
    pub token: Option<String>,
}

// ── Visitor socket ───────────────────────────────────────────────────────────

/// `GET /public/chat/ws/{session_id}?token=VISITOR_TOKEN`
pub async fn visitor_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let claims = match state.tokenizer.verify_visitor(&token) {
        Ok(claims) if claims.session_id == session_id => claims,
        _ => return (StatusCode::UNAUTHORIZED, "invalid token").into_response(),
    };
    let session = match state
        .engine
        .store()
        .get_session(&claims.tenant_id, &session_id)
        .await
    {
        Ok(session) => session,
        Err(_) => return (StatusCode::NOT_FOUND, "session not found").into_response(),
    };

    ws.on_upgrade(move |socket| handle_visitor_socket(socket, state, session))
}

async fn handle_visitor_socket(socket: WebSocket, state: AppState, session: ChatSession) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_handle = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let conn_id = state
        .manager
        .add_connection(
            ConnKind::Visitor,
            &session.tenant_id,
            None,
            &session.id,
            client_tx.clone(),
        )
        .await;
    info!(conn_id = %conn_id, session_id = %session.id, "visitor socket attached");

    while let Some(msg) = ws_rx.next().await {
        let Some(envelope) = read_envelope(msg, &client_tx, &session.id) else {
            break;
        };
        let Some(envelope) = envelope else {
            continue;
        };

        match envelope.r#type.as_str() {
            event::CHAT_MESSAGE => {
                let Some(data) = parse_chat_data(&envelope, &client_tx, &session.id) else {
                    continue;
                };
                if let Err(e) = state
                    .engine
                    .send_visitor_message(&session.tenant_id, &session.id, &data.content, Some(&conn_id))
                    .await
                {
                    send_error(&client_tx, &session.id, &e.to_string());
                }
            },
            event::TYPING_START | event::TYPING_STOP => {
                let typing = Envelope::new(envelope.r#type.clone(), &session.id, now_ms())
                    .with_data(envelope.data.clone().unwrap_or_else(
                        || serde_json::json!({"author_name": session.customer_name}),
                    ))
                    .with_from(FromType::Visitor)
                    .with_delivery(DeliveryType::Broadcast);
                state
                    .manager
                    .broadcast_to_session(&session.id, &typing, Some(&conn_id))
                    .await;
            },
            event::PING => {
                state.manager.record_pong(&conn_id).await;
                let pong = Envelope::new(event::PONG, &session.id, now_ms());
                if let Ok(json) = serde_json::to_string(&pong) {
                    let _ = client_tx.send(json);
                }
            },
            event::PONG => state.manager.record_pong(&conn_id).await,
            other => {
                debug!(conn_id = %conn_id, event_type = other, "visitor socket: unsupported event");
                send_error(&client_tx, &session.id, "unsupported event type");
            },
        }
    }

    state.manager.remove_connection(&conn_id).await;
    drop(client_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, "visitor socket closed");
}

// ── Agent socket ─────────────────────────────────────────────────────────────

/// `GET /tenants/{tenant_id}/chat/agent/ws?token=AGENT_BEARER`
pub async fn agent_ws(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let claims = match state.tokenizer.verify_agent(&token) {
        Ok(claims) if claims.tenant_id == tenant_id => claims,
        _ => return (StatusCode::UNAUTHORIZED, "invalid token").into_response(),
    };
    let ctx = match state.directory.load_context(&claims.tenant_id, &claims.agent_id).await {
        Ok(ctx) => ctx,
        Err(_) => return (StatusCode::UNAUTHORIZED, "unknown agent").into_response(),
    };

    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, ctx))
}

async fn handle_agent_socket(socket: WebSocket, state: AppState, ctx: AgentContext) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_handle = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let agent_global = agent_global_session(&ctx.tenant_id);
    let conn_id = state
        .manager
        .add_connection(
            ConnKind::Agent,
            &ctx.tenant_id,
            Some(&ctx.agent_id),
            &agent_global,
            client_tx.clone(),
        )
        .await;
    info!(conn_id = %conn_id, agent_id = %ctx.agent_id, "agent socket attached");

    while let Some(msg) = ws_rx.next().await {
        let Some(envelope) = read_envelope(msg, &client_tx, "") else {
            break;
        };
        let Some(envelope) = envelope else {
            continue;
        };
        let session_id = envelope.session_id.clone();

        match envelope.r#type.as_str() {
            event::SESSION_SUBSCRIBE => {
                match authorize_session(&state, &ctx, &session_id, false).await {
                    Ok(_session) => {
                        state.manager.subscribe_session(&conn_id, &session_id).await;
                        let joined = Envelope::new(event::AGENT_JOINED, &session_id, now_ms())
                            .with_data(serde_json::json!({
                                "agent_id": ctx.agent_id,
                                "agent_name": ctx.display_name,
                            }))
                            .with_from(FromType::Agent)
                            .with_delivery(DeliveryType::Broadcast);
                        state
                            .manager
                            .broadcast_to_session(&session_id, &joined, Some(&conn_id))
                            .await;
                    },
                    Err(message) => send_error(&client_tx, &session_id, &message),
                }
            },
            event::SESSION_UNSUBSCRIBE => {
                state.manager.unsubscribe_session(&conn_id, &session_id).await;
            },
            event::CHAT_MESSAGE => {
                let Some(data) = parse_chat_data(&envelope, &client_tx, &session_id) else {
                    continue;
                };
                if let Err(message) = authorize_session(&state, &ctx, &session_id, true).await {
                    send_error(&client_tx, &session_id, &message);
                    continue;
                }
                if let Err(e) = state
                    .engine
                    .send_agent_message(
                        &ctx.tenant_id,
                        &session_id,
                        &ctx.agent_id,
                        &ctx.display_name,
                        &data.content,
                        data.is_private,
                        Some(&conn_id),
                    )
                    .await
                {
                    send_error(&client_tx, &session_id, &e.to_string());
                }
            },
            event::TYPING_START | event::TYPING_STOP => {
                if authorize_session(&state, &ctx, &session_id, false).await.is_err() {
                    continue;
                }
                let typing = Envelope::new(envelope.r#type.clone(), &session_id, now_ms())
                    .with_data(envelope.data.clone().unwrap_or_else(|| {
                        serde_json::json!({
                            "author_id": ctx.agent_id,
                            "author_name": ctx.display_name,
                        })
                    }))
                    .with_from(FromType::Agent)
                    .with_delivery(DeliveryType::Broadcast);
                state
                    .manager
                    .broadcast_to_session(&session_id, &typing, Some(&conn_id))
                    .await;
            },
            event::PING => {
                state.manager.record_pong(&conn_id).await;
                let pong = Envelope::new(event::PONG, "", now_ms());
                if let Ok(json) = serde_json::to_string(&pong) {
                    let _ = client_tx.send(json);
                }
            },
            event::PONG => state.manager.record_pong(&conn_id).await,
            other => {
                debug!(conn_id = %conn_id, event_type = other, "agent socket: unsupported event");
                send_error(&client_tx, &session_id, "unsupported event type");
            },
        }
    }

    state.manager.remove_connection(&conn_id).await;
    drop(client_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, agent_id = %ctx.agent_id, "agent socket closed");
}

/// Resolve a session inside the agent's tenant and check the role contract.
/// Returns a client-safe error message on refusal.
async fn authorize_session(
    state: &AppState,
    ctx: &AgentContext,
    session_id: &str,
    write: bool,
) -> Result<ChatSession, String> {
    if session_id.is_empty() {
        return Err("missing session_id".into());
    }
    let session = state
        .engine
        .store()
        .get_session(&ctx.tenant_id, session_id)
        .await
        .map_err(|_| "session not found".to_string())?;
    let allowed = if write {
        ctx.can_write(&session.project_id)
    } else {
        ctx.can_read(&session.project_id)
    };
    if !allowed {
        return Err("no access to this session".into());
    }
    Ok(session)
}

// ── Shared frame plumbing ────────────────────────────────────────────────────

/// Decode one inbound frame. Outer `None` ends the loop (close or transport
/// error); inner `None` skips the frame (non-text, oversized, or
/// unparseable).
fn read_envelope(
    msg: Result<Message, axum::Error>,
    client_tx: &mpsc::UnboundedSender<String>,
    session_id: &str,
) -> Option<Option<Envelope>> {
    let text = match msg {
        Ok(Message::Text(text)) => text.to_string(),
        Ok(Message::Close(_)) => return None,
        Ok(_) => return Some(None),
        Err(e) => {
            debug!(error = %e, "socket read error");
            return None;
        },
    };

    if text.len() > MAX_PAYLOAD_BYTES {
        warn!(size = text.len(), "oversized frame dropped");
        send_error(client_tx, session_id, "payload too large");
        return Some(None);
    }

    match serde_json::from_str::<Envelope>(&text) {
        Ok(envelope) => Some(Some(envelope)),
        Err(e) => {
            debug!(error = %e, "invalid envelope");
            send_error(client_tx, session_id, "invalid envelope");
            Some(None)
        },
    }
}

fn parse_chat_data(
    envelope: &Envelope,
    client_tx: &mpsc::UnboundedSender<String>,
    session_id: &str,
) -> Option<ChatData> {
    let data = envelope.data.clone().unwrap_or(serde_json::Value::Null);
    match serde_json::from_value::<ChatData>(data) {
        Ok(data) if !data.content.trim().is_empty() => Some(data),
        _ => {
            send_error(client_tx, session_id, "chat_message requires data.content");
            None
        },
    }
}

fn send_error(client_tx: &mpsc::UnboundedSender<String>, session_id: &str, message: &str) {
    let envelope = Envelope::error(session_id, now_ms(), message);
    if let Ok(json) = serde_json::to_string(&envelope) {
        let _ = client_tx.send(json);
    }
}
