//! Widget configuration persistence.

use sqlx::SqlitePool;

use meshdesk_common::{Error, Result, new_id, now_ms};

use crate::types::{ChatWidget, NewWidget, UpdateWidget, validate_appearance};

pub struct WidgetStore {
    pool: SqlitePool,
}

impl WidgetStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bootstrap the widget tables.
    ///
    /// Schema is managed by the gateway migrations in production; this is
    /// retained for tests running on in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS widget_domains (
                id         TEXT    PRIMARY KEY,
                tenant_id  TEXT    NOT NULL,
                project_id TEXT    NOT NULL,
                domain     TEXT    NOT NULL,
                challenge  TEXT    NOT NULL,
                verified   INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (tenant_id, project_id, domain)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_widgets (
                id                   TEXT    PRIMARY KEY,
                tenant_id            TEXT    NOT NULL,
                project_id           TEXT    NOT NULL,
                domain_id            TEXT    NOT NULL REFERENCES widget_domains(id),
                name                 TEXT    NOT NULL,
                shape                TEXT    NOT NULL,
                bubble_style         TEXT    NOT NULL,
                size                 TEXT    NOT NULL,
                position             TEXT    NOT NULL,
                primary_color        TEXT    NOT NULL,
                agent_name           TEXT    NOT NULL,
                agent_avatar         TEXT,
                welcome_message      TEXT    NOT NULL,
                offline_message      TEXT    NOT NULL,
                auto_open_delay_secs INTEGER NOT NULL DEFAULT 0,
                allow_file_uploads   INTEGER NOT NULL DEFAULT 0,
                sound_enabled        INTEGER NOT NULL DEFAULT 1,
                require_email        INTEGER NOT NULL DEFAULT 0,
                ai_assist            INTEGER NOT NULL DEFAULT 0,
                show_powered_by      INTEGER NOT NULL DEFAULT 1,
                is_active            INTEGER NOT NULL DEFAULT 1,
                created_at           INTEGER NOT NULL,
                updated_at           INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_widgets_tenant_project
             ON chat_widgets(tenant_id, project_id)",
        )
        .execute(pool)
        .await
        .ok();

        Ok(())
    }

    pub async fn create(
        &self,
        tenant_id: &str,
        project_id: &str,
        new: NewWidget,
    ) -> Result<ChatWidget> {
        validate_appearance(&new.primary_color, new.auto_open_delay_secs)?;

        // The domain must belong to the same tenant and project.
        let domain_row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM widget_domains WHERE id = ? AND tenant_id = ? AND project_id = ?",
        )
        .bind(&new.domain_id)
        .bind(tenant_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        if domain_row.is_none() {
            return Err(Error::not_found("domain not registered for this project"));
        }

        let now = now_ms();
        let widget = ChatWidget {
            id: new_id(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            domain_id: new.domain_id,
            name: new.name,
            shape: new.shape,
            bubble_style: new.bubble_style,
            size: new.size,
            position: new.position,
            primary_color: new.primary_color,
            agent_name: new.agent_name,
            agent_avatar: new.agent_avatar,
            welcome_message: new.welcome_message,
            offline_message: new.offline_message,
            auto_open_delay_secs: new.auto_open_delay_secs,
            allow_file_uploads: new.allow_file_uploads,
            sound_enabled: new.sound_enabled,
            require_email: new.require_email,
            ai_assist: new.ai_assist,
            show_powered_by: new.show_powered_by,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        self.insert(&widget).await?;
        Ok(widget)
    }

    async fn insert(&self, w: &ChatWidget) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO chat_widgets (
                id, tenant_id, project_id, domain_id, name, shape, bubble_style, size,
                position, primary_color, agent_name, agent_avatar, welcome_message,
                offline_message, auto_open_delay_secs, allow_file_uploads, sound_enabled,
                require_email, ai_assist, show_powered_by, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&w.id)
        .bind(&w.tenant_id)
        .bind(&w.project_id)
        .bind(&w.domain_id)
        .bind(&w.name)
        .bind(enum_str(&w.shape))
        .bind(enum_str(&w.bubble_style))
        .bind(enum_str(&w.size))
        .bind(enum_str(&w.position))
        .bind(&w.primary_color)
        .bind(&w.agent_name)
        .bind(&w.agent_avatar)
        .bind(&w.welcome_message)
        .bind(&w.offline_message)
        .bind(w.auto_open_delay_secs)
        .bind(w.allow_file_uploads as i32)
        .bind(w.sound_enabled as i32)
        .bind(w.require_email as i32)
        .bind(w.ai_assist as i32)
        .bind(w.show_powered_by as i32)
        .bind(w.is_active as i32)
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, tenant_id: &str, widget_id: &str) -> Result<ChatWidget> {
        let row: Option<WidgetRow> =
            sqlx::query_as("SELECT * FROM chat_widgets WHERE id = ? AND tenant_id = ?")
                .bind(widget_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WidgetRow::into_widget)
            .transpose()?
            .ok_or_else(|| Error::not_found("widget not found"))
    }

    /// Public-path lookup by widget id alone; the caller learns the tenant
    /// from the returned row. Only active widgets resolve.
    pub async fn get_public(&self, widget_id: &str) -> Result<ChatWidget> {
        let row: Option<WidgetRow> =
            sqlx::query_as("SELECT * FROM chat_widgets WHERE id = ? AND is_active = 1")
                .bind(widget_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WidgetRow::into_widget)
            .transpose()?
            .ok_or_else(|| Error::not_found("widget not found"))
    }

    pub async fn list(&self, tenant_id: &str, project_id: &str) -> Result<Vec<ChatWidget>> {
        let rows: Vec<WidgetRow> = sqlx::query_as(
            "SELECT * FROM chat_widgets WHERE tenant_id = ? AND project_id = ?
             ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WidgetRow::into_widget).collect()
    }

    /// Widgets embeddable on a hostname: verified domain, active widget.
    /// This is the public discovery path, so it is not tenant-scoped — the
    /// hostname itself selects the tenant.
    pub async fn lookup_by_domain(&self, hostname: &str) -> Result<Vec<ChatWidget>> {
        let rows: Vec<WidgetRow> = sqlx::query_as(
            r#"SELECT w.* FROM chat_widgets w
               JOIN widget_domains d ON d.id = w.domain_id
               WHERE d.domain = ? AND d.verified = 1 AND w.is_active = 1
               ORDER BY w.created_at"#,
        )
        .bind(hostname)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WidgetRow::into_widget).collect()
    }

    pub async fn update(
        &self,
        tenant_id: &str,
        widget_id: &str,
        patch: UpdateWidget,
    ) -> Result<ChatWidget> {
        let mut widget = self.get(tenant_id, widget_id).await?;

        if let Some(v) = patch.name {
            widget.name = v;
        }
        if let Some(v) = patch.shape {
            widget.shape = v;
        }
        if let Some(v) = patch.bubble_style {
            widget.bubble_style = v;
        }
        if let Some(v) = patch.size {
            widget.size = v;
        }
        if let Some(v) = patch.position {
            widget.position = v;
        }
        if let Some(v) = patch.primary_color {
            widget.primary_color = v;
        }
        if let Some(v) = patch.agent_name {
            widget.agent_name = v;
        }
        if let Some(v) = patch.agent_avatar {
            widget.agent_avatar = Some(v);
        }
        if let Some(v) = patch.welcome_message {
            widget.welcome_message = v;
        }
        if let Some(v) = patch.offline_message {
            widget.offline_message = v;
        }
        if let Some(v) = patch.auto_open_delay_secs {
            widget.auto_open_delay_secs = v;
        }
        if let Some(v) = patch.allow_file_uploads {
            widget.allow_file_uploads = v;
        }
        if let Some(v) = patch.sound_enabled {
            widget.sound_enabled = v;
        }
        if let Some(v) = patch.require_email {
            widget.require_email = v;
        }
        if let Some(v) = patch.ai_assist {
            widget.ai_assist = v;
        }
        if let Some(v) = patch.show_powered_by {
            widget.show_powered_by = v;
        }
        if let Some(v) = patch.is_active {
            widget.is_active = v;
        }
        validate_appearance(&widget.primary_color, widget.auto_open_delay_secs)?;
        widget.updated_at = now_ms();

        sqlx::query(
            r#"UPDATE chat_widgets SET
                name = ?, shape = ?, bubble_style = ?, size = ?, position = ?,
                primary_color = ?, agent_name = ?, agent_avatar = ?, welcome_message = ?,
                offline_message = ?, auto_open_delay_secs = ?, allow_file_uploads = ?,
                sound_enabled = ?, require_email = ?, ai_assist = ?, show_powered_by = ?,
                is_active = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&widget.name)
        .bind(enum_str(&widget.shape))
        .bind(enum_str(&widget.bubble_style))
        .bind(enum_str(&widget.size))
        .bind(enum_str(&widget.position))
        .bind(&widget.primary_color)
        .bind(&widget.agent_name)
        .bind(&widget.agent_avatar)
        .bind(&widget.welcome_message)
        .bind(&widget.offline_message)
        .bind(widget.auto_open_delay_secs)
        .bind(widget.allow_file_uploads as i32)
        .bind(widget.sound_enabled as i32)
        .bind(widget.require_email as i32)
        .bind(widget.ai_assist as i32)
        .bind(widget.show_powered_by as i32)
        .bind(widget.is_active as i32)
        .bind(widget.updated_at)
        .bind(&widget.id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(widget)
    }

    /// Delete a widget. Existing sessions keep resolving by id — nothing
    /// cascades.
    pub async fn delete(&self, tenant_id: &str, widget_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM chat_widgets WHERE id = ? AND tenant_id = ?")
            .bind(widget_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("widget not found"));
        }
        Ok(())
    }
}

fn enum_str<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn enum_from_str<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| Error::internal(format!("unknown enum value in row: {value:?}")))
}

#[derive(sqlx::FromRow)]
struct WidgetRow {
    id: String,
    tenant_id: String,
    project_id: String,
    domain_id: String,
    name: String,
    shape: String,
    bubble_style: String,
    size: String,
    position: String,
    primary_color: String,
    agent_name: String,
    agent_avatar: Option<String>,
    welcome_message: String,
    offline_message: String,
    auto_open_delay_secs: i64,
    allow_file_uploads: i64,
    sound_enabled: i64,
    require_email: i64,
    ai_assist: i64,
    show_powered_by: i64,
    is_active: i64,
    created_at: i64,
    updated_at: i64,
}

impl WidgetRow {
    fn into_widget(self) -> Result<ChatWidget> {
        Ok(ChatWidget {
            id: self.id,
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            domain_id: self.domain_id,
            name: self.name,
            shape: enum_from_str(&self.shape)?,
            bubble_style: enum_from_str(&self.bubble_style)?,
            size: enum_from_str(&self.size)?,
            position: enum_from_str(&self.position)?,
            primary_color: self.primary_color,
            agent_name: self.agent_name,
            agent_avatar: self.agent_avatar,
            welcome_message: self.welcome_message,
            offline_message: self.offline_message,
            auto_open_delay_secs: self.auto_open_delay_secs,
            allow_file_uploads: self.allow_file_uploads != 0,
            sound_enabled: self.sound_enabled != 0,
            require_email: self.require_email != 0,
            ai_assist: self.ai_assist != 0,
            show_powered_by: self.show_powered_by != 0,
            is_active: self.is_active != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::domains::DomainValidator, crate::types::*};

    async fn store() -> WidgetStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        WidgetStore::init(&pool).await.unwrap();
        WidgetStore::new(pool)
    }

    async fn seed_domain(store: &WidgetStore, tenant: &str, project: &str) -> String {
        let validator = DomainValidator::new(store.pool.clone());
        let domain = validator
            .start_verification(tenant, project, "example.com")
            .await
            .unwrap();
        validator.mark_verified(tenant, "example.com").await.unwrap();
        domain.id
    }

    fn new_widget(domain_id: &str) -> NewWidget {
        serde_json::from_value(serde_json::json!({
            "name": "Main site",
            "domain_id": domain_id,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;

        let w = store.create("t1", "p1", new_widget(&domain_id)).await.unwrap();
        assert_eq!(w.primary_color, "#4f46e5");

        let got = store.get("t1", &w.id).await.unwrap();
        assert_eq!(got.name, "Main site");

        assert_eq!(store.list("t1", "p1").await.unwrap().len(), 1);

        store.delete("t1", &w.id).await.unwrap();
        assert!(store.get("t1", &w.id).await.is_err());
    }

    #[tokio::test]
    async fn create_rejects_foreign_domain() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;
        // Same domain id, different tenant.
        let err = store.create("t2", "p1", new_widget(&domain_id)).await.unwrap_err();
        assert_eq!(err.kind, meshdesk_common::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn tenant_isolation_on_get() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;
        let w = store.create("t1", "p1", new_widget(&domain_id)).await.unwrap();
        assert!(store.get("t2", &w.id).await.is_err());
    }

    #[tokio::test]
    async fn update_patches_fields() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;
        let w = store.create("t1", "p1", new_widget(&domain_id)).await.unwrap();

        let patch = UpdateWidget {
            primary_color: Some("#112233".into()),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = store.update("t1", &w.id, patch).await.unwrap();
        assert_eq!(updated.primary_color, "#112233");
        assert!(!updated.is_active);
        // Untouched fields survive.
        assert_eq!(updated.name, "Main site");
    }

    #[tokio::test]
    async fn update_validates_color() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;
        let w = store.create("t1", "p1", new_widget(&domain_id)).await.unwrap();
        let patch = UpdateWidget {
            primary_color: Some("blue".into()),
            ..Default::default()
        };
        assert!(store.update("t1", &w.id, patch).await.is_err());
    }

    #[tokio::test]
    async fn lookup_by_domain_requires_verified_and_active() {
        let store = store().await;
        let validator = DomainValidator::new(store.pool.clone());
        let domain = validator
            .start_verification("t1", "p1", "shop.example.com")
            .await
            .unwrap();
        let w = store.create("t1", "p1", new_widget(&domain.id)).await.unwrap();

        // Unverified domain: nothing resolves.
        assert!(store.lookup_by_domain("shop.example.com").await.unwrap().is_empty());

        validator.mark_verified("t1", "shop.example.com").await.unwrap();
        let found = store.lookup_by_domain("shop.example.com").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, w.id);

        // Deactivated widget disappears from the public lookup.
        store
            .update("t1", &w.id, UpdateWidget {
                is_active: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(store.lookup_by_domain("shop.example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_public_skips_inactive() {
        let store = store().await;
        let domain_id = seed_domain(&store, "t1", "p1").await;
        let mut new = new_widget(&domain_id);
        new.is_active = false;
        let w = store.create("t1", "p1", new).await.unwrap();
        assert!(store.get_public(&w.id).await.is_err());
    }
}
