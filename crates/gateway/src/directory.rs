//! Read-side of the tenant directory.
//!
//! Tenant/project/agent CRUD belongs to the surrounding platform; the chat
//! core only loads agent records and role bindings to enforce the permission
//! contract on every request.

use {
    serde::{Deserialize, Serialize},
    sqlx::SqlitePool,
};

use meshdesk_common::{Error, Result, new_id, now_ms};

/// Per-project role of an agent. `tenant_admin` grants every project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    TenantAdmin,
    ProjectAdmin,
    Supervisor,
    Agent,
    ReadOnly,
}

impl Role {
    #[must_use]
    pub fn grants_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub display_name: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct RoleBinding {
    pub project_id: String,
    pub role: Role,
}

/// An authenticated agent with resolved role bindings, attached to every
/// tenant-scoped request.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub tenant_id: String,
    pub agent_id: String,
    pub email: String,
    pub display_name: String,
    pub bindings: Vec<RoleBinding>,
}

impl AgentContext {
    #[must_use]
    pub fn is_tenant_admin(&self) -> bool {
        self.bindings.iter().any(|b| b.role == Role::TenantAdmin)
    }

    #[must_use]
    pub fn can_read(&self, project_id: &str) -> bool {
        self.is_tenant_admin() || self.bindings.iter().any(|b| b.project_id == project_id)
    }

    #[must_use]
    pub fn can_write(&self, project_id: &str) -> bool {
        self.is_tenant_admin()
            || self
                .bindings
                .iter()
                .any(|b| b.project_id == project_id && b.role.grants_write())
    }

    /// Guard that the path tenant matches the token's tenant. A mismatch is
    /// indistinguishable from the resource not existing.
    pub fn ensure_tenant(&self, tenant_id: &str) -> Result<()> {
        if self.tenant_id != tenant_id {
            return Err(Error::not_found("not found"));
        }
        Ok(())
    }
}

pub struct AgentDirectory {
    pool: SqlitePool,
}

impl AgentDirectory {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bootstrap the directory tables.
    ///
    /// Schema is managed by the gateway migrations in production; retained
    /// for tests on in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tenants (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'active',
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS projects (
                id         TEXT PRIMARY KEY,
                tenant_id  TEXT NOT NULL REFERENCES tenants(id),
                name       TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS agents (
                id           TEXT PRIMARY KEY,
                tenant_id    TEXT NOT NULL REFERENCES tenants(id),
                email        TEXT NOT NULL,
                display_name TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'active',
                created_at   INTEGER NOT NULL,
                UNIQUE (tenant_id, email)
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS agent_project_roles (
                tenant_id  TEXT NOT NULL,
                agent_id   TEXT NOT NULL REFERENCES agents(id),
                project_id TEXT NOT NULL,
                role       TEXT NOT NULL,
                PRIMARY KEY (tenant_id, agent_id, project_id)
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Load an agent and its bindings; inactive agents do not resolve.
    pub async fn load_context(&self, tenant_id: &str, agent_id: &str) -> Result<AgentContext> {
        let agent: Option<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, tenant_id, email, display_name, status FROM agents
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(agent_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((id, tenant_id, email, display_name, status)) = agent else {
            return Err(Error::unauthenticated("unknown agent"));
        };
        if status != "active" {
            return Err(Error::unauthenticated("agent is not active"));
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT project_id, role FROM agent_project_roles WHERE tenant_id = ? AND agent_id = ?",
        )
        .bind(&tenant_id)
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let bindings = rows
            .into_iter()
            .filter_map(|(project_id, role)| {
                let role: Role =
                    serde_json::from_value(serde_json::Value::String(role)).ok()?;
                Some(RoleBinding { project_id, role })
            })
            .collect();

        Ok(AgentContext {
            tenant_id,
            agent_id: id,
            email,
            display_name,
            bindings,
        })
    }

    // ── Provisioning helpers ─────────────────────────────────────────────────
    // The platform's admin service owns these rows in production; the
    // helpers exist for tests and local bootstrap.

    #[doc(hidden)]
    pub async fn seed_tenant(&self, tenant_id: &str, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tenants (id, name, status, created_at) VALUES (?, ?, 'active', ?)")
            .bind(tenant_id)
            .bind(name)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[doc(hidden)]
    pub async fn seed_project(&self, tenant_id: &str, project_id: &str, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO projects (id, tenant_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(project_id)
            .bind(tenant_id)
            .bind(name)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[doc(hidden)]
    pub async fn seed_agent(
        &self,
        tenant_id: &str,
        email: &str,
        display_name: &str,
    ) -> Result<String> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO agents (id, tenant_id, email, display_name, status, created_at)
             VALUES (?, ?, ?, ?, 'active', ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(email)
        .bind(display_name)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    #[doc(hidden)]
    pub async fn seed_role(
        &self,
        tenant_id: &str,
        agent_id: &str,
        project_id: &str,
        role: Role,
    ) -> Result<()> {
        let role_str = serde_json::to_value(role)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        sqlx::query(
            "INSERT OR REPLACE INTO agent_project_roles (tenant_id, agent_id, project_id, role)
             VALUES (?, ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .bind(project_id)
        .bind(role_str)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn directory() -> AgentDirectory {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        AgentDirectory::init(&pool).await.unwrap();
        AgentDirectory::new(pool)
    }

    #[tokio::test]
    async fn load_context_resolves_bindings() {
        let d = directory().await;
        d.seed_tenant("t1", "Acme").await.unwrap();
        let agent = d.seed_agent("t1", "grace@acme.test", "Grace").await.unwrap();
        d.seed_role("t1", &agent, "p1", Role::Agent).await.unwrap();
        d.seed_role("t1", &agent, "p2", Role::ReadOnly).await.unwrap();

        let ctx = d.load_context("t1", &agent).await.unwrap();
        assert!(ctx.can_read("p1"));
        assert!(ctx.can_write("p1"));
        assert!(ctx.can_read("p2"));
        assert!(!ctx.can_write("p2"));
        assert!(!ctx.can_read("p3"));
        assert!(!ctx.is_tenant_admin());
    }

    #[tokio::test]
    async fn tenant_admin_grants_everything() {
        let d = directory().await;
        d.seed_tenant("t1", "Acme").await.unwrap();
        let agent = d.seed_agent("t1", "root@acme.test", "Root").await.unwrap();
        d.seed_role("t1", &agent, "*", Role::TenantAdmin).await.unwrap();

        let ctx = d.load_context("t1", &agent).await.unwrap();
        assert!(ctx.can_read("any-project"));
        assert!(ctx.can_write("any-project"));
    }

    #[tokio::test]
    async fn unknown_or_cross_tenant_agent_is_unauthenticated() {
        let d = directory().await;
        d.seed_tenant("t1", "Acme").await.unwrap();
        let agent = d.seed_agent("t1", "grace@acme.test", "Grace").await.unwrap();

        assert!(d.load_context("t1", "missing").await.is_err());
        // Same agent id under the wrong tenant does not resolve.
        assert!(d.load_context("t2", &agent).await.is_err());
    }

    #[test]
    fn ensure_tenant_mismatch_reads_as_not_found() {
        let ctx = AgentContext {
            tenant_id: "t1".into(),
            agent_id: "a1".into(),
            email: "x@y.z".into(),
            display_name: "X".into(),
            bindings: vec![],
        };
        assert!(ctx.ensure_tenant("t1").is_ok());
        let err = ctx.ensure_tenant("t2").unwrap_err();
        assert_eq!(err.kind, meshdesk_common::ErrorKind::NotFound);
    }
}
