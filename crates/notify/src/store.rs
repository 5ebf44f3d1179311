use {serde::Serialize, sqlx::SqlitePool};

use meshdesk_common::{Error, Result, new_id, now_ms};

/// A persisted notification for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub tenant_id: String,
    pub agent_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: i64,
}

pub struct NotificationStore {
    pool: SqlitePool,
}

impl NotificationStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bootstrap the notifications table.
    ///
    /// Schema is managed by the gateway migrations in production; retained
    /// for tests on in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS notifications (
                id         TEXT    PRIMARY KEY,
                tenant_id  TEXT    NOT NULL,
                agent_id   TEXT    NOT NULL,
                kind       TEXT    NOT NULL,
                payload    TEXT    NOT NULL,
                read       INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_agent
             ON notifications(tenant_id, agent_id, read, created_at)",
        )
        .execute(pool)
        .await
        .ok();
        Ok(())
    }

    pub async fn insert(
        &self,
        tenant_id: &str,
        agent_id: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Notification> {
        let notification = Notification {
            id: new_id(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            kind: kind.into(),
            payload,
            read: false,
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO notifications (id, tenant_id, agent_id, kind, payload, read, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&notification.id)
        .bind(&notification.tenant_id)
        .bind(&notification.agent_id)
        .bind(&notification.kind)
        .bind(notification.payload.to_string())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(notification)
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT * FROM notifications WHERE tenant_id = ? AND agent_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationRow::into_notification).collect()
    }

    pub async fn unread_count(&self, tenant_id: &str, agent_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE tenant_id = ? AND agent_id = ? AND read = 0",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn mark_read(
        &self,
        tenant_id: &str,
        agent_id: &str,
        notification_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET read = 1 WHERE id = ? AND tenant_id = ? AND agent_id = ?",
        )
        .bind(notification_id)
        .bind(tenant_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("notification not found"));
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, tenant_id: &str, agent_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read = 1 WHERE tenant_id = ? AND agent_id = ? AND read = 0",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    tenant_id: String,
    agent_id: String,
    kind: String,
    payload: String,
    read: i64,
    created_at: i64,
}

impl NotificationRow {
    fn into_notification(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            tenant_id: self.tenant_id,
            agent_id: self.agent_id,
            kind: self.kind,
            payload: serde_json::from_str(&self.payload)?,
            read: self.read != 0,
            created_at: self.created_at,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    async fn store() -> NotificationStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        NotificationStore::init(&pool).await.unwrap();
        NotificationStore::new(pool)
    }

    #[tokio::test]
    async fn insert_list_and_counts() {
        let store = store().await;
        store
            .insert("t1", "a1", "chat_message", json!({"session_id": "s1"}))
            .await
            .unwrap();
        store
            .insert("t1", "a1", "session_assigned", json!({"session_id": "s2"}))
            .await
            .unwrap();
        store.insert("t1", "a2", "chat_message", json!({})).await.unwrap();

        let list = store.list("t1", "a1", 10).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(store.unread_count("t1", "a1").await.unwrap(), 2);
        assert_eq!(store.unread_count("t1", "a2").await.unwrap(), 1);
        assert_eq!(store.unread_count("t2", "a1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_is_scoped() {
        let store = store().await;
        let n = store.insert("t1", "a1", "chat_message", json!({})).await.unwrap();

        // Wrong tenant or wrong agent cannot mark it.
        assert!(store.mark_read("t2", "a1", &n.id).await.is_err());
        assert!(store.mark_read("t1", "a2", &n.id).await.is_err());

        store.mark_read("t1", "a1", &n.id).await.unwrap();
        assert_eq!(store.unread_count("t1", "a1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_all_read() {
        let store = store().await;
        for _ in 0..3 {
            store.insert("t1", "a1", "chat_message", json!({})).await.unwrap();
        }
        assert_eq!(store.mark_all_read("t1", "a1").await.unwrap(), 3);
        assert_eq!(store.mark_all_read("t1", "a1").await.unwrap(), 0);
    }
}
