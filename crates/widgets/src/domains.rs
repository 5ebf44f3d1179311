//! Domain verification.
//!
//! A widget may only be served to pages on domains its tenant controls. The
//! tenant proves control by serving a challenge token at a well-known path;
//! the validator fetches it and flips the domain to verified. Until then the
//! public lookup and widget initiation refuse the domain.

use std::time::Duration;

use {base64::Engine, serde::Serialize, sqlx::SqlitePool, tracing::debug};

use meshdesk_common::{Error, Result, new_id, now_ms};

/// Where the tenant serves the challenge.
pub const WELL_KNOWN_PATH: &str = "/.well-known/meshdesk-verification.txt";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A registered origin domain, verified or pending.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedDomain {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub domain: String,
    pub challenge: String,
    pub verified: bool,
    pub created_at: i64,
}

pub struct DomainValidator {
    pool: SqlitePool,
    http: reqwest::Client,
}

impl DomainValidator {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { pool, http }
    }

    /// Register a domain and hand back the challenge the tenant must serve.
    /// Re-registering a pending domain returns the existing challenge;
    /// re-registering a verified one is a conflict.
    pub async fn start_verification(
        &self,
        tenant_id: &str,
        project_id: &str,
        domain: &str,
    ) -> Result<VerifiedDomain> {
        let domain = normalize_domain(domain)?;

        if let Some(existing) = self.find(tenant_id, &domain).await? {
            if existing.verified {
                return Err(Error::conflict("domain already verified"));
            }
            return Ok(existing);
        }

        let row = VerifiedDomain {
            id: new_id(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            domain: domain.clone(),
            challenge: format!("meshdesk-verify-{}", random_challenge()),
            verified: false,
            created_at: now_ms(),
        };
        sqlx::query(
            r#"INSERT INTO widget_domains (id, tenant_id, project_id, domain, challenge, verified, created_at)
               VALUES (?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(&row.id)
        .bind(&row.tenant_id)
        .bind(&row.project_id)
        .bind(&row.domain)
        .bind(&row.challenge)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch the well-known file from the domain and mark it verified when
    /// the served token matches the issued challenge.
    pub async fn poll_verification(&self, tenant_id: &str, domain: &str) -> Result<VerifiedDomain> {
        let domain = normalize_domain(domain)?;
        let row = self
            .find(tenant_id, &domain)
            .await?
            .ok_or_else(|| Error::not_found("domain not registered"))?;
        if row.verified {
            return Ok(row);
        }

        let url = format!("https://{domain}{WELL_KNOWN_PATH}");
        debug!(%domain, %url, "polling domain verification");
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("challenge fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::unavailable(format!("challenge fetch failed: {e}")))?;

        if !challenge_matches(&body, &row.challenge) {
            return Err(Error::invalid("served challenge does not match"));
        }
        self.mark_verified(tenant_id, &domain).await
    }

    /// Flip a registered domain to verified. Exposed for provisioning flows
    /// that validate ownership out of band.
    pub async fn mark_verified(&self, tenant_id: &str, domain: &str) -> Result<VerifiedDomain> {
        let domain = normalize_domain(domain)?;
        let result =
            sqlx::query("UPDATE widget_domains SET verified = 1 WHERE tenant_id = ? AND domain = ?")
                .bind(tenant_id)
                .bind(&domain)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("domain not registered"));
        }
        self.find(tenant_id, &domain)
            .await?
            .ok_or_else(|| Error::not_found("domain not registered"))
    }

    pub async fn list(&self, tenant_id: &str, project_id: &str) -> Result<Vec<VerifiedDomain>> {
        let rows: Vec<DomainRow> = sqlx::query_as(
            "SELECT * FROM widget_domains WHERE tenant_id = ? AND project_id = ?
             ORDER BY created_at",
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DomainRow::into_domain).collect())
    }

    /// Whether the domain row behind a widget is verified. Used on the
    /// public initiation path, where only the widget's domain binding is at
    /// hand.
    pub async fn is_verified_id(&self, domain_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT verified FROM widget_domains WHERE id = ?")
                .bind(domain_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some_and(|(v,)| v != 0))
    }

    async fn find(&self, tenant_id: &str, domain: &str) -> Result<Option<VerifiedDomain>> {
        let row: Option<DomainRow> =
            sqlx::query_as("SELECT * FROM widget_domains WHERE tenant_id = ? AND domain = ?")
                .bind(tenant_id)
                .bind(domain)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(DomainRow::into_domain))
    }
}

/// Lowercase, strip a trailing dot, reject schemes/paths/ports.
fn normalize_domain(domain: &str) -> Result<String> {
    let d = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if d.is_empty()
        || d.contains("://")
        || d.contains('/')
        || d.contains(':')
        || !d.contains('.')
    {
        return Err(Error::invalid(format!("not a valid domain: {domain:?}")));
    }
    Ok(d)
}

/// The served file may carry a trailing newline or surrounding whitespace.
fn challenge_matches(body: &str, challenge: &str) -> bool {
    body.trim() == challenge
}

fn random_challenge() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(sqlx::FromRow)]
struct DomainRow {
    id: String,
    tenant_id: String,
    project_id: String,
    domain: String,
    challenge: String,
    verified: i64,
    created_at: i64,
}

impl DomainRow {
    fn into_domain(self) -> VerifiedDomain {
        VerifiedDomain {
            id: self.id,
            tenant_id: self.tenant_id,
            project_id: self.project_id,
            domain: self.domain,
            challenge: self.challenge,
            verified: self.verified != 0,
            created_at: self.created_at,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store::WidgetStore};

    async fn validator() -> DomainValidator {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        WidgetStore::init(&pool).await.unwrap();
        DomainValidator::new(pool)
    }

    #[tokio::test]
    async fn start_verification_issues_challenge() {
        let v = validator().await;
        let d = v.start_verification("t1", "p1", "Example.COM").await.unwrap();
        assert_eq!(d.domain, "example.com");
        assert!(d.challenge.starts_with("meshdesk-verify-"));
        assert!(!d.verified);
    }

    #[tokio::test]
    async fn restart_returns_same_challenge_until_verified() {
        let v = validator().await;
        let a = v.start_verification("t1", "p1", "example.com").await.unwrap();
        let b = v.start_verification("t1", "p1", "example.com").await.unwrap();
        assert_eq!(a.challenge, b.challenge);

        v.mark_verified("t1", "example.com").await.unwrap();
        let err = v
            .start_verification("t1", "p1", "example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind, meshdesk_common::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn mark_verified_unknown_domain_is_not_found() {
        let v = validator().await;
        assert!(v.mark_verified("t1", "nope.example.com").await.is_err());
    }

    #[tokio::test]
    async fn domains_are_tenant_scoped() {
        let v = validator().await;
        v.start_verification("t1", "p1", "example.com").await.unwrap();
        // Another tenant can register the same hostname independently.
        let other = v.start_verification("t2", "p9", "example.com").await.unwrap();
        assert_eq!(other.tenant_id, "t2");
        // And verifying t1's registration does not touch t2's.
        v.mark_verified("t1", "example.com").await.unwrap();
        let t2 = v.list("t2", "p9").await.unwrap();
        assert!(!t2[0].verified);
    }

    #[test]
    fn normalize_rejects_urls_and_ports() {
        assert!(normalize_domain("https://example.com").is_err());
        assert!(normalize_domain("example.com/path").is_err());
        assert!(normalize_domain("example.com:8080").is_err());
        assert!(normalize_domain("localhost").is_err());
        assert_eq!(normalize_domain("Example.Com.").unwrap(), "example.com");
    }

    #[test]
    fn challenge_comparison_trims_whitespace() {
        assert!(challenge_matches("  token-123\n", "token-123"));
        assert!(!challenge_matches("token-124", "token-123"));
    }
}
