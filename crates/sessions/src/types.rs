use serde::{Deserialize, Serialize};

/// Lifecycle of a live conversation.
///
/// `active → waiting` is advanced by the inactivity sweeper, `ended` is
/// terminal for writes, `transferred` marks a reassignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Waiting,
    Ended,
    Transferred,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Ended => "ended",
            Self::Transferred => "transferred",
        }
    }

    /// Whether new messages are accepted in this state.
    #[must_use]
    pub fn accepts_writes(self) -> bool {
        !matches!(self, Self::Ended)
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorType {
    Visitor,
    Agent,
    AiAgent,
    System,
}

impl AuthorType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Agent => "agent",
            Self::AiAgent => "ai-agent",
            Self::System => "system",
        }
    }

    /// The author type the mirrored ticket message carries.
    #[must_use]
    pub fn ticket_author(self) -> TicketAuthorType {
        match self {
            Self::Visitor => TicketAuthorType::Customer,
            Self::Agent | Self::AiAgent => TicketAuthorType::Agent,
            Self::System => TicketAuthorType::System,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    File,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingOnCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::WaitingOnCustomer => "waiting_on_customer",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketAuthorType {
    Customer,
    Agent,
    System,
}

impl TicketAuthorType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

/// An end user, distinct from agents. Anonymous visitors get a row without
/// an email.
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub created_at: i64,
}

/// The durable home of a conversation's history.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    /// Per-tenant monotonic ticket number.
    pub number: i64,
    pub subject: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub customer_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One entry in a ticket's timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TicketMessage {
    pub id: String,
    pub tenant_id: String,
    pub ticket_id: String,
    pub author_type: TicketAuthorType,
    pub author_id: String,
    pub body: String,
    pub is_private: bool,
    pub created_at: i64,
}

/// A live conversation instance.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub widget_id: String,
    pub ticket_id: String,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub assigned_agent_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub last_activity_at: i64,
}

/// A message within a chat session. `(created_at, id)` is the authoritative
/// order; both are server-assigned.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub author_type: AuthorType,
    pub author_id: Option<String>,
    pub author_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_private: bool,
    pub read_by_visitor: bool,
    pub read_by_agent: bool,
    pub read_at: Option<i64>,
    pub created_at: i64,
}
