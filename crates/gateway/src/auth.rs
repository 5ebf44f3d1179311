//! Request authentication extractors.
//!
//! Agents present a bearer token (header, or `token` query parameter for
//! WebSocket upgrades, which cannot reliably carry headers everywhere).
//! Visitors present the session token issued at initiation, via the
//! `X-Visitor-Token` header or the same query parameter.

use axum::{extract::FromRequestParts, http::request::Parts};

use {
    meshdesk_common::Error,
    meshdesk_tokens::VisitorClaims,
};

use crate::{directory::AgentContext, error::ApiError, state::AppState};

/// Header carrying the visitor session token on HTTP calls.
pub const VISITOR_TOKEN_HEADER: &str = "x-visitor-token";

/// Authenticated agent, with role bindings loaded fresh per request.
pub struct AgentAuth(pub AgentContext);

impl FromRequestParts<AppState> for AgentAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_param(parts, "token"))
            .ok_or_else(|| Error::unauthenticated("missing bearer token"))?;
        let claims = state.tokenizer.verify_agent(&token)?;
        let ctx = state
            .directory
            .load_context(&claims.tenant_id, &claims.agent_id)
            .await?;
        Ok(Self(ctx))
    }
}

/// Authenticated visitor session token.
pub struct VisitorAuth(pub VisitorClaims);

impl FromRequestParts<AppState> for VisitorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(VISITOR_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| query_param(parts, "token"))
            .ok_or_else(|| Error::unauthenticated("missing visitor token"))?;
        Ok(Self(state.tokenizer.verify_visitor(&token)?))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Parse one query parameter without pulling in a full deserializer.
pub fn query_param(parts: &Parts, name: &str) -> Option<String> {
    let query = parts.uri.query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(name)
            && let Some(value) = value.strip_prefix('=')
        {
            return Some(value.to_string());
        }
    }
    None
}
