//! Session, ticket, and message persistence.
//!
//! Every write here is a single short transaction carrying the tenant
//! predicate. Message appends are atomic across the chat row, the mirrored
//! ticket row, and the session activity stamp — delivery happens after
//! commit and never rolls persistence back.

use sqlx::{Sqlite, SqlitePool, Transaction};

use meshdesk_common::{Error, Result, new_id, now_ms};

use crate::types::{
    AuthorType, ChatMessage, ChatSession, Customer, MessageType, SessionStatus, Ticket,
    TicketAuthorType, TicketMessage, TicketPriority, TicketStatus,
};

/// Stable author id stamped on ticket messages mirrored from `ai-agent`
/// and `system` chat messages.
pub const SYSTEM_AI_AUTHOR: &str = "system:ai-agent";
pub const SYSTEM_AUTHOR: &str = "system";

/// Payload for appending one message to a session.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub author_type: AuthorType,
    pub author_id: Option<String>,
    pub author_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_private: bool,
}

/// Outcome of an append: the persisted message plus the session as it looks
/// after the write (a waiting session reactivates on new traffic).
#[derive(Debug, Clone)]
pub struct Appended {
    pub message: ChatMessage,
    pub session: ChatSession,
    pub session_reactivated: bool,
}

pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bootstrap the conversation tables.
    ///
    /// Schema is managed by the gateway migrations in production; retained
    /// for tests on in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS customers (
                id           TEXT PRIMARY KEY,
                tenant_id    TEXT NOT NULL,
                email        TEXT,
                display_name TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tickets (
                id          TEXT    PRIMARY KEY,
                tenant_id   TEXT    NOT NULL,
                project_id  TEXT    NOT NULL,
                number      INTEGER NOT NULL,
                subject     TEXT    NOT NULL,
                status      TEXT    NOT NULL,
                priority    TEXT    NOT NULL,
                customer_id TEXT    NOT NULL REFERENCES customers(id),
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                UNIQUE (tenant_id, number)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS ticket_messages (
                id          TEXT    PRIMARY KEY,
                tenant_id   TEXT    NOT NULL,
                ticket_id   TEXT    NOT NULL REFERENCES tickets(id),
                author_type TEXT    NOT NULL,
                author_id   TEXT    NOT NULL,
                body        TEXT    NOT NULL,
                is_private  INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_sessions (
                id                TEXT    PRIMARY KEY,
                tenant_id         TEXT    NOT NULL,
                project_id        TEXT    NOT NULL,
                widget_id         TEXT    NOT NULL,
                ticket_id         TEXT    NOT NULL REFERENCES tickets(id),
                customer_id       TEXT    NOT NULL REFERENCES customers(id),
                customer_email    TEXT,
                customer_name     TEXT    NOT NULL,
                assigned_agent_id TEXT,
                status            TEXT    NOT NULL,
                created_at        INTEGER NOT NULL,
                last_activity_at  INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id              TEXT    PRIMARY KEY,
                tenant_id       TEXT    NOT NULL,
                session_id      TEXT    NOT NULL REFERENCES chat_sessions(id),
                author_type     TEXT    NOT NULL,
                author_id       TEXT,
                author_name     TEXT    NOT NULL,
                content         TEXT    NOT NULL,
                message_type    TEXT    NOT NULL,
                is_private      INTEGER NOT NULL DEFAULT 0,
                read_by_visitor INTEGER NOT NULL DEFAULT 0,
                read_by_agent   INTEGER NOT NULL DEFAULT 0,
                read_at         INTEGER,
                created_at      INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_tickets_timeline
             ON tickets(tenant_id, project_id, created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_ticket_messages_timeline
             ON ticket_messages(tenant_id, ticket_id, created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_timeline
             ON chat_messages(tenant_id, session_id, created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_activity
             ON chat_sessions(tenant_id, status, last_activity_at)",
        ] {
            sqlx::query(stmt).execute(pool).await.ok();
        }

        Ok(())
    }

    // ── Session creation ─────────────────────────────────────────────────────

    /// Create the customer (reusing an existing one by email), the backing
    /// ticket with a per-tenant number, and the session — one transaction.
    pub async fn create_session(
        &self,
        tenant_id: &str,
        project_id: &str,
        widget_id: &str,
        customer_email: Option<&str>,
        customer_name: &str,
        subject: &str,
    ) -> Result<(ChatSession, Ticket)> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms();

        let customer = self
            .find_or_create_customer(&mut tx, tenant_id, customer_email, customer_name, now)
            .await?;

        let number: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(number), 0) + 1 FROM tickets WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_one(&mut *tx)
                .await?;

        let ticket = Ticket {
            id: new_id(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            number: number.0,
            subject: subject.into(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            customer_id: customer.id.clone(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO tickets (id, tenant_id, project_id, number, subject, status, priority, customer_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&ticket.id)
        .bind(&ticket.tenant_id)
        .bind(&ticket.project_id)
        .bind(ticket.number)
        .bind(&ticket.subject)
        .bind(ticket.status.as_str())
        .bind(serde_plain(&ticket.priority))
        .bind(&ticket.customer_id)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await?;

        let session = ChatSession {
            id: new_id(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            widget_id: widget_id.into(),
            ticket_id: ticket.id.clone(),
            customer_id: customer.id.clone(),
            customer_email: customer.email.clone(),
            customer_name: customer.display_name.clone(),
            assigned_agent_id: None,
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
        };
        sqlx::query(
            r#"INSERT INTO chat_sessions (id, tenant_id, project_id, widget_id, ticket_id, customer_id, customer_email, customer_name, assigned_agent_id, status, created_at, last_activity_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)"#,
        )
        .bind(&session.id)
        .bind(&session.tenant_id)
        .bind(&session.project_id)
        .bind(&session.widget_id)
        .bind(&session.ticket_id)
        .bind(&session.customer_id)
        .bind(&session.customer_email)
        .bind(&session.customer_name)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((session, ticket))
    }

    async fn find_or_create_customer(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        tenant_id: &str,
        email: Option<&str>,
        display_name: &str,
        now: i64,
    ) -> Result<Customer> {
        if let Some(email) = email {
            let row: Option<CustomerRow> =
                sqlx::query_as("SELECT * FROM customers WHERE tenant_id = ? AND email = ?")
                    .bind(tenant_id)
                    .bind(email)
                    .fetch_optional(&mut **tx)
                    .await?;
            if let Some(row) = row {
                return Ok(row.into_customer());
            }
        }

        let customer = Customer {
            id: new_id(),
            tenant_id: tenant_id.into(),
            email: email.map(Into::into),
            display_name: display_name.into(),
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO customers (id, tenant_id, email, display_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.email)
        .bind(&customer.display_name)
        .bind(customer.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(customer)
    }

    // ── Session reads ────────────────────────────────────────────────────────

    pub async fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<ChatSession> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM chat_sessions WHERE id = ? AND tenant_id = ?")
                .bind(session_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SessionRow::into_session)
            .transpose()?
            .ok_or_else(|| Error::not_found("session not found"))
    }

    pub async fn list_sessions(
        &self,
        tenant_id: &str,
        project_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<ChatSession>> {
        let rows: Vec<SessionRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM chat_sessions WHERE tenant_id = ? AND project_id = ? AND status = ?
                     ORDER BY last_activity_at DESC",
                )
                .bind(tenant_id)
                .bind(project_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as(
                    "SELECT * FROM chat_sessions WHERE tenant_id = ? AND project_id = ?
                     ORDER BY last_activity_at DESC",
                )
                .bind(tenant_id)
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?
            },
        };
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    // ── Message append (with ticket mirror) ──────────────────────────────────

    pub async fn append_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        append: AppendMessage,
    ) -> Result<Appended> {
        let mut tx = self.pool.begin().await?;

        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM chat_sessions WHERE id = ? AND tenant_id = ?")
                .bind(session_id)
                .bind(tenant_id)
                .fetch_optional(&mut *tx)
                .await?;
        let mut session = row
            .map(SessionRow::into_session)
            .transpose()?
            .ok_or_else(|| Error::not_found("session not found"))?;

        if !session.status.accepts_writes() {
            return Err(Error::conflict("session has ended"));
        }

        // Timestamps are strictly increasing within a session so the
        // `(created_at, id)` order is total even when appends land in the
        // same millisecond.
        let last: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(created_at), 0) FROM chat_messages
             WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;
        let now = now_ms().max(last.0 + 1);
        let message = ChatMessage {
            id: new_id(),
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            author_type: append.author_type,
            author_id: append.author_id,
            author_name: append.author_name,
            content: append.content,
            message_type: append.message_type,
            is_private: append.is_private,
            read_by_visitor: false,
            read_by_agent: false,
            read_at: None,
            created_at: now,
        };
        sqlx::query(
            r#"INSERT INTO chat_messages (id, tenant_id, session_id, author_type, author_id, author_name, content, message_type, is_private, read_by_visitor, read_by_agent, read_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, NULL, ?)"#,
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(&message.session_id)
        .bind(message.author_type.as_str())
        .bind(&message.author_id)
        .bind(&message.author_name)
        .bind(&message.content)
        .bind(serde_plain(&message.message_type))
        .bind(message.is_private as i32)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        // Mirror into the ticket timeline with the durable author mapping.
        let mirror_author_id = match message.author_type {
            AuthorType::Visitor => session.customer_id.clone(),
            AuthorType::Agent => message.author_id.clone().unwrap_or_default(),
            AuthorType::AiAgent => SYSTEM_AI_AUTHOR.to_string(),
            AuthorType::System => SYSTEM_AUTHOR.to_string(),
        };
        sqlx::query(
            r#"INSERT INTO ticket_messages (id, tenant_id, ticket_id, author_type, author_id, body, is_private, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(tenant_id)
        .bind(&session.ticket_id)
        .bind(message.author_type.ticket_author().as_str())
        .bind(&mirror_author_id)
        .bind(&message.content)
        .bind(message.is_private as i32)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        // New traffic reactivates a session parked in `waiting`.
        let session_reactivated = session.status == SessionStatus::Waiting;
        if session_reactivated {
            session.status = SessionStatus::Active;
        }
        session.last_activity_at = now;
        sqlx::query(
            "UPDATE chat_sessions SET status = ?, last_activity_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(session.status.as_str())
        .bind(session.last_activity_at)
        .bind(session_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE tickets SET updated_at = ? WHERE id = ? AND tenant_id = ?")
            .bind(now)
            .bind(&session.ticket_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Appended {
            message,
            session,
            session_reactivated,
        })
    }

    // ── Message reads ────────────────────────────────────────────────────────

    /// Messages of a session in `(created_at, id)` order, optionally after a
    /// cursor message id. Private agent notes are filtered when the caller is
    /// the visitor side.
    pub async fn list_messages(
        &self,
        tenant_id: &str,
        session_id: &str,
        after: Option<&str>,
        limit: i64,
        include_private: bool,
    ) -> Result<Vec<ChatMessage>> {
        let anchor = match after {
            Some(id) => Some(self.message_anchor(tenant_id, session_id, id).await?),
            None => None,
        };

        let private_clause = if include_private { "" } else { "AND is_private = 0" };
        let rows: Vec<MessageRow> = match anchor {
            Some((created_at, id)) => {
                let sql = format!(
                    "SELECT * FROM chat_messages
                     WHERE tenant_id = ? AND session_id = ? {private_clause}
                       AND (created_at > ? OR (created_at = ? AND id > ?))
                     ORDER BY created_at, id LIMIT ?"
                );
                sqlx::query_as(&sql)
                    .bind(tenant_id)
                    .bind(session_id)
                    .bind(created_at)
                    .bind(created_at)
                    .bind(id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            },
            None => {
                let sql = format!(
                    "SELECT * FROM chat_messages
                     WHERE tenant_id = ? AND session_id = ? {private_clause}
                     ORDER BY created_at, id LIMIT ?"
                );
                sqlx::query_as(&sql)
                    .bind(tenant_id)
                    .bind(session_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn message_anchor(
        &self,
        tenant_id: &str,
        session_id: &str,
        message_id: &str,
    ) -> Result<(i64, String)> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT created_at, id FROM chat_messages WHERE id = ? AND tenant_id = ? AND session_id = ?",
        )
        .bind(message_id)
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found("message not found"))
    }

    // ── Read receipts ────────────────────────────────────────────────────────

    /// Mark every message authored by the other party, up to and including
    /// the anchor, as read by the visitor. Monotonic and replay-safe.
    pub async fn mark_visitor_read(
        &self,
        tenant_id: &str,
        session_id: &str,
        up_to_message_id: &str,
    ) -> Result<u64> {
        let (created_at, id) = self
            .message_anchor(tenant_id, session_id, up_to_message_id)
            .await?;
        let result = sqlx::query(
            r#"UPDATE chat_messages
               SET read_by_visitor = 1, read_at = COALESCE(read_at, ?)
               WHERE tenant_id = ? AND session_id = ?
                 AND author_type IN ('agent', 'ai-agent')
                 AND read_by_visitor = 0
                 AND (created_at < ? OR (created_at = ? AND id <= ?))"#,
        )
        .bind(now_ms())
        .bind(tenant_id)
        .bind(session_id)
        .bind(created_at)
        .bind(created_at)
        .bind(&id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Counterpart for the agent side: marks visitor-authored messages.
    pub async fn mark_agent_read(
        &self,
        tenant_id: &str,
        session_id: &str,
        up_to_message_id: &str,
    ) -> Result<u64> {
        let (created_at, id) = self
            .message_anchor(tenant_id, session_id, up_to_message_id)
            .await?;
        let result = sqlx::query(
            r#"UPDATE chat_messages
               SET read_by_agent = 1, read_at = COALESCE(read_at, ?)
               WHERE tenant_id = ? AND session_id = ?
                 AND author_type = 'visitor'
                 AND read_by_agent = 0
                 AND (created_at < ? OR (created_at = ? AND id <= ?))"#,
        )
        .bind(now_ms())
        .bind(tenant_id)
        .bind(session_id)
        .bind(created_at)
        .bind(created_at)
        .bind(&id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Session transitions ──────────────────────────────────────────────────

    /// Assign or reassign an agent. Reassignment flips the session to
    /// `transferred`; assigning the same agent twice is a conflict.
    pub async fn assign_agent(
        &self,
        tenant_id: &str,
        session_id: &str,
        agent_id: &str,
    ) -> Result<ChatSession> {
        let mut session = self.get_session(tenant_id, session_id).await?;
        if !session.status.accepts_writes() {
            return Err(Error::conflict("session has ended"));
        }
        match session.assigned_agent_id.as_deref() {
            Some(current) if current == agent_id => {
                return Err(Error::conflict("agent already assigned"));
            },
            Some(_) => session.status = SessionStatus::Transferred,
            None => {},
        }
        session.assigned_agent_id = Some(agent_id.to_string());

        sqlx::query(
            "UPDATE chat_sessions SET assigned_agent_id = ?, status = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(agent_id)
        .bind(session.status.as_str())
        .bind(session_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    /// Transition to `ended`. Idempotent — ending an ended session returns it
    /// unchanged.
    pub async fn end_session(&self, tenant_id: &str, session_id: &str) -> Result<ChatSession> {
        let mut session = self.get_session(tenant_id, session_id).await?;
        if session.status == SessionStatus::Ended {
            return Ok(session);
        }
        session.status = SessionStatus::Ended;
        sqlx::query("UPDATE chat_sessions SET status = ? WHERE id = ? AND tenant_id = ?")
            .bind(session.status.as_str())
            .bind(session_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(session)
    }

    /// Park every `active` session whose last activity predates the cutoff.
    /// Returns the sessions that transitioned, for broadcast.
    pub async fn sweep_inactive(&self, cutoff_ms: i64) -> Result<Vec<ChatSession>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM chat_sessions WHERE status = 'active' AND last_activity_at < ?",
        )
        .bind(cutoff_ms)
        .fetch_all(&mut *tx)
        .await?;

        let mut moved = Vec::with_capacity(rows.len());
        for row in rows {
            let mut session = row.into_session()?;
            sqlx::query(
                "UPDATE chat_sessions SET status = 'waiting' WHERE id = ? AND tenant_id = ?",
            )
            .bind(&session.id)
            .bind(&session.tenant_id)
            .execute(&mut *tx)
            .await?;
            session.status = SessionStatus::Waiting;
            moved.push(session);
        }
        tx.commit().await?;
        Ok(moved)
    }

    // ── Ticket reads and public append ───────────────────────────────────────

    pub async fn get_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Ticket> {
        let row: Option<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE id = ? AND tenant_id = ?")
                .bind(ticket_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TicketRow::into_ticket)
            .transpose()?
            .ok_or_else(|| Error::not_found("ticket not found"))
    }

    pub async fn list_ticket_messages(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        include_private: bool,
    ) -> Result<Vec<TicketMessage>> {
        let private_clause = if include_private { "" } else { "AND is_private = 0" };
        let sql = format!(
            "SELECT * FROM ticket_messages WHERE tenant_id = ? AND ticket_id = ? {private_clause}
             ORDER BY created_at, id"
        );
        let rows: Vec<TicketMessageRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(ticket_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TicketMessageRow::into_message).collect()
    }

    /// Append a customer-authored message straight onto a ticket — the
    /// magic-link write path, which has no live session.
    pub async fn append_ticket_message(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        customer_id: &str,
        body: &str,
    ) -> Result<TicketMessage> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM tickets WHERE id = ? AND tenant_id = ?")
                .bind(ticket_id)
                .bind(tenant_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(Error::not_found("ticket not found"));
        }

        let message = TicketMessage {
            id: new_id(),
            tenant_id: tenant_id.into(),
            ticket_id: ticket_id.into(),
            author_type: TicketAuthorType::Customer,
            author_id: customer_id.into(),
            body: body.into(),
            is_private: false,
            created_at: now_ms(),
        };
        sqlx::query(
            r#"INSERT INTO ticket_messages (id, tenant_id, ticket_id, author_type, author_id, body, is_private, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(&message.ticket_id)
        .bind(message.author_type.as_str())
        .bind(&message.author_id)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE tickets SET updated_at = ? WHERE id = ? AND tenant_id = ?")
            .bind(message.created_at)
            .bind(ticket_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }
}

fn serde_plain<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn serde_from_plain<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| Error::internal(format!("unknown enum value in row: {value:?}")))
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: String,
    tenant_id: String,
    email: Option<String>,
    display_name: String,
    created_at: i64,
}

impl CustomerRow {
    fn into_customer(self) -> Customer {
        Customer {
            id: self.id,
            tenant_id: self.tenant_id,
            email: self.email,
            display_name: self.display_name,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    project_id: String,
    widget_id: String,
    ticket_id: String,
    customer_id: String,
    customer_email: Option<String>,
    customer_name: String,
    assigned_agent_id: Option<String>,
    status: String,
    created_at: i64,
    last_activity_at: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<ChatSession> {
        Ok(ChatSession {
            id: self.id,
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            widget_id: self.widget_id,
            ticket_id: self.ticket_id,
            customer_id: self.customer_id,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            assigned_agent_id: self.assigned_agent_id,
            status: serde_from_plain(&self.status)?,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    tenant_id: String,
    session_id: String,
    author_type: String,
    author_id: Option<String>,
    author_name: String,
    content: String,
    message_type: String,
    is_private: i64,
    read_by_visitor: i64,
    read_by_agent: i64,
    read_at: Option<i64>,
    created_at: i64,
}

impl MessageRow {
    fn into_message(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: self.id,
            tenant_id: self.tenant_id,
            session_id: self.session_id,
            author_type: serde_from_plain(&self.author_type)?,
            author_id: self.author_id,
            author_name: self.author_name,
            content: self.content,
            message_type: serde_from_plain(&self.message_type)?,
            is_private: self.is_private != 0,
            read_by_visitor: self.read_by_visitor != 0,
            read_by_agent: self.read_by_agent != 0,
            read_at: self.read_at,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    tenant_id: String,
    project_id: String,
    number: i64,
    subject: String,
    status: String,
    priority: String,
    customer_id: String,
    created_at: i64,
    updated_at: i64,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket> {
        Ok(Ticket {
            id: self.id,
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            number: self.number,
            subject: self.subject,
            status: serde_from_plain(&self.status)?,
            priority: serde_from_plain(&self.priority)?,
            customer_id: self.customer_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketMessageRow {
    id: String,
    tenant_id: String,
    ticket_id: String,
    author_type: String,
    author_id: String,
    body: String,
    is_private: i64,
    created_at: i64,
}

impl TicketMessageRow {
    fn into_message(self) -> Result<TicketMessage> {
        Ok(TicketMessage {
            id: self.id,
            tenant_id: self.tenant_id,
            ticket_id: self.ticket_id,
            author_type: serde_from_plain(&self.author_type)?,
            author_id: self.author_id,
            body: self.body,
            is_private: self.is_private != 0,
            created_at: self.created_at,
        })
    }
}
