//! Chat wire protocol and coordination-key vocabulary.
//!
//! All WebSocket communication is one UTF-8 JSON [`Envelope`] per text frame,
//! in both directions. The same envelope shape travels over the pub/sub
//! fabric between server instances, so a frame received from a peer server
//! can be written to a local socket untouched.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Interval between server-initiated ping frames.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Cache TTL for a connection record. Heartbeat × 10; a record that outlives
/// this without a refresh is reaped.
pub const CONNECTION_TTL_SECS: u64 = HEARTBEAT_INTERVAL_SECS * 10;
/// TTL for a session's connection set, refreshed on activity.
pub const SESSION_SET_TTL_SECS: u64 = 3600;
/// Maximum accepted inbound frame size.
pub const MAX_PAYLOAD_BYTES: usize = 65_536;
/// Pseudo-session prefix carried by agent-global connections. The full
/// subscription key is `agent-global:{tenant_id}`.
pub const AGENT_GLOBAL_PREFIX: &str = "agent-global";

// ── Event types ──────────────────────────────────────────────────────────────

pub mod event {
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";
    pub const SESSION_SUBSCRIBE: &str = "session_subscribe";
    pub const SESSION_UNSUBSCRIBE: &str = "session_unsubscribe";
    pub const SESSION_UPDATE: &str = "session_update";
    pub const SESSION_ASSIGNED: &str = "session_assigned";
    pub const AGENT_JOINED: &str = "agent_joined";
    pub const NOTIFICATION: &str = "notification";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

// ── Channel and cache-key layout ─────────────────────────────────────────────

/// Pub/sub channel fanning an envelope out to every connection of a session.
#[must_use]
pub fn session_channel(session_id: &str) -> String {
    format!("chat:session:{session_id}")
}

/// Pub/sub channel delivering to one specific connection, wherever it lives.
#[must_use]
pub fn connection_channel(conn_id: &str) -> String {
    format!("chat:connection:{conn_id}")
}

/// Cache key holding a connection's metadata record.
#[must_use]
pub fn connection_key(conn_id: &str) -> String {
    format!("connection:{conn_id}")
}

/// Cache key holding the set of connection ids attached to a session.
#[must_use]
pub fn session_connections_key(session_id: &str) -> String {
    format!("session:{session_id}:connections")
}

/// Subscription key for an agent-global connection of a tenant.
#[must_use]
pub fn agent_global_session(tenant_id: &str) -> String {
    format!("{AGENT_GLOBAL_PREFIX}:{tenant_id}")
}

/// Extract `session_id` back out of a `chat:session:{id}` channel name.
#[must_use]
pub fn parse_session_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix("chat:session:")
}

/// Extract `conn_id` back out of a `chat:connection:{id}` channel name.
#[must_use]
pub fn parse_connection_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix("chat:connection:")
}

// ── Delivery tags ────────────────────────────────────────────────────────────

/// How a server→client `chat_message` reached this socket. Clients suppress
/// re-rendering of `self` echoes; `direct` and `broadcast` dedupe by message
/// id when the optimistic local delivery races the pub/sub copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Direct,
    Broadcast,
    #[serde(rename = "self")]
    SelfEcho,
}

// ── Author tags ──────────────────────────────────────────────────────────────

/// Who wrote a message or originated an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FromType {
    Visitor,
    Agent,
    AiAgent,
    System,
}

impl FromType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Agent => "agent",
            Self::AiAgent => "ai-agent",
            Self::System => "system",
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The bidirectional JSON frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_type: Option<FromType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_type: Option<DeliveryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(r#type: impl Into<String>, session_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            r#type: r#type.into(),
            session_id: session_id.into(),
            data: None,
            timestamp,
            from_type: None,
            delivery_type: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: FromType) -> Self {
        self.from_type = Some(from);
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryType) -> Self {
        self.delivery_type = Some(delivery);
        self
    }

    /// A server→client `error` envelope.
    pub fn error(session_id: impl Into<String>, timestamp: i64, message: impl Into<String>) -> Self {
        let mut env = Self::new(event::ERROR, session_id, timestamp);
        env.error = Some(message.into());
        env
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_absent_fields() {
        let env = Envelope::new(event::PING, "s1", 42);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"ping""#));
        assert!(!json.contains("delivery_type"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn self_delivery_serializes_as_self() {
        let env = Envelope::new(event::CHAT_MESSAGE, "s1", 1)
            .with_delivery(DeliveryType::SelfEcho)
            .with_from(FromType::Visitor);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""delivery_type":"self""#));
        assert!(json.contains(r#""from_type":"visitor""#));
    }

    #[test]
    fn ai_agent_round_trips_kebab_case() {
        let json = r#"{"type":"chat_message","session_id":"s","timestamp":5,"from_type":"ai-agent"}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.from_type, Some(FromType::AiAgent));
    }

    #[test]
    fn channel_names_round_trip() {
        assert_eq!(parse_session_channel(&session_channel("abc")), Some("abc"));
        assert_eq!(
            parse_connection_channel(&connection_channel("c-9")),
            Some("c-9")
        );
        assert_eq!(parse_session_channel("chat:connection:c-9"), None);
    }

    #[test]
    fn agent_global_key_is_tenant_scoped() {
        assert_eq!(agent_global_session("t1"), "agent-global:t1");
    }
}
