//! Signed bearer tokens: magic links, visitor session tokens, agent bearers.
//!
//! Tokens are compact strings `base64url(claims-json).base64url(hmac-sha256)`
//! signed with a server-side secret. Nothing is persisted server-side — the
//! token itself is the only state, so issuance is cheap and revocation is by
//! expiry only. Verification checks shape, then signature (constant time),
//! then expiry with a bounded clock-skew allowance.

pub mod error;

pub use error::{Error, Result};

use {
    base64::Engine,
    base64::engine::general_purpose::URL_SAFE_NO_PAD,
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    sha2::Sha256,
};

use meshdesk_common::now_ms;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew between issuer and verifier.
pub const CLOCK_SKEW_SECS: i64 = 60;

/// Access scopes a magic link can carry. Closed set: escalation requires a
/// new token, never a wider scope value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
}

/// Claims of a magic-link token granting public access to one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicLinkClaims {
    pub sub: String,
    pub tenant_id: String,
    pub project_id: String,
    pub ticket_id: String,
    pub customer_id: String,
    pub scopes: Vec<Scope>,
    /// Expiry, epoch milliseconds.
    pub exp: i64,
    pub jti: String,
}

impl MagicLinkClaims {
    pub const SUBJECT: &'static str = "public-ticket";

    #[must_use]
    pub fn can_read(&self) -> bool {
        self.scopes.contains(&Scope::Read)
    }

    #[must_use]
    pub fn can_write(&self) -> bool {
        self.scopes.contains(&Scope::Write)
    }

    /// Guard for the ticket-read paths.
    pub fn require_read(&self) -> Result<()> {
        if !self.can_read() {
            return Err(Error::ScopeDenied("read"));
        }
        Ok(())
    }

    /// Guard for the customer-append path. Absent `write` scope always
    /// refuses; escalation takes a new token.
    pub fn require_write(&self) -> Result<()> {
        if !self.can_write() {
            return Err(Error::ScopeDenied("write"));
        }
        Ok(())
    }
}

/// Claims of a visitor session token, issued at chat initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorClaims {
    pub sub: String,
    pub tenant_id: String,
    pub session_id: String,
    pub exp: i64,
}

impl VisitorClaims {
    pub const SUBJECT: &'static str = "visitor";
}

/// Claims of an agent bearer token. Role bindings are not embedded — they are
/// loaded from the directory tables on each request so revocation is
/// immediate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentClaims {
    pub sub: String,
    pub tenant_id: String,
    pub agent_id: String,
    pub email: String,
    pub exp: i64,
}

impl AgentClaims {
    pub const SUBJECT: &'static str = "agent";
}

/// Issues and verifies all token kinds with one symmetric secret.
pub struct Tokenizer {
    secret: Vec<u8>,
}

impl Tokenizer {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a magic-link token for one ticket's public view.
    pub fn issue_magic_link(
        &self,
        tenant_id: &str,
        project_id: &str,
        ticket_id: &str,
        customer_id: &str,
        scopes: Vec<Scope>,
        ttl_secs: i64,
    ) -> String {
        let claims = MagicLinkClaims {
            sub: MagicLinkClaims::SUBJECT.into(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            ticket_id: ticket_id.into(),
            customer_id: customer_id.into(),
            scopes,
            exp: now_ms() + ttl_secs * 1000,
            jti: random_token_id(),
        };
        self.encode(&claims)
    }

    /// Verify a magic-link token: shape, signature, subject, expiry.
    pub fn verify_magic_link(&self, token: &str) -> Result<MagicLinkClaims> {
        let claims: MagicLinkClaims = self.decode(token)?;
        if claims.sub != MagicLinkClaims::SUBJECT {
            return Err(Error::Malformed);
        }
        check_expiry(claims.exp)?;
        Ok(claims)
    }

    pub fn issue_visitor(&self, tenant_id: &str, session_id: &str, ttl_secs: i64) -> String {
        let claims = VisitorClaims {
            sub: VisitorClaims::SUBJECT.into(),
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            exp: now_ms() + ttl_secs * 1000,
        };
        self.encode(&claims)
    }

    pub fn verify_visitor(&self, token: &str) -> Result<VisitorClaims> {
        let claims: VisitorClaims = self.decode(token)?;
        if claims.sub != VisitorClaims::SUBJECT {
            return Err(Error::Malformed);
        }
        check_expiry(claims.exp)?;
        Ok(claims)
    }

    pub fn issue_agent(
        &self,
        tenant_id: &str,
        agent_id: &str,
        email: &str,
        ttl_secs: i64,
    ) -> String {
        let claims = AgentClaims {
            sub: AgentClaims::SUBJECT.into(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            email: email.into(),
            exp: now_ms() + ttl_secs * 1000,
        };
        self.encode(&claims)
    }

    pub fn verify_agent(&self, token: &str) -> Result<AgentClaims> {
        let claims: AgentClaims = self.decode(token)?;
        if claims.sub != AgentClaims::SUBJECT {
            return Err(Error::Malformed);
        }
        check_expiry(claims.exp)?;
        Ok(claims)
    }

    // ── Encoding ─────────────────────────────────────────────────────────────

    fn encode<T: Serialize>(&self, claims: &T) -> String {
        // Claims structs serialize infallibly: string/number/vec fields only.
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(&payload);
        let sig = URL_SAFE_NO_PAD.encode(self.sign(body.as_bytes()));
        format!("{body}.{sig}")
    }

    fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let (body, sig) = token.split_once('.').ok_or(Error::Malformed)?;
        let provided = URL_SAFE_NO_PAD.decode(sig).map_err(|_| Error::Malformed)?;
        let expected = self.sign(body.as_bytes());
        if !constant_time_eq(&provided, &expected) {
            return Err(Error::InvalidSignature);
        }
        let payload = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| Error::Malformed)?;
        serde_json::from_slice(&payload).map_err(|_| Error::Malformed)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length; new_from_slice only fails for
        // unrepresentable key sizes, which cannot happen here.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return Vec::new();
        };
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

fn check_expiry(exp: i64) -> Result<()> {
    if exp + CLOCK_SKEW_SECS * 1000 < now_ms() {
        return Err(Error::Expired);
    }
    Ok(())
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Random 128-bit id for `jti` claims.
fn random_token_id() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new(b"test-secret".to_vec())
    }

    #[test]
    fn magic_link_round_trips() {
        let tk = tokenizer();
        let token =
            tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read, Scope::Write], 600);
        let claims = tk.verify_magic_link(&token).unwrap();
        assert_eq!(claims.tenant_id, "t1");
        assert_eq!(claims.ticket_id, "tk1");
        assert!(claims.can_read());
        assert!(claims.can_write());
    }

    #[test]
    fn read_only_scope_denies_write() {
        let tk = tokenizer();
        let token = tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read], 600);
        let claims = tk.verify_magic_link(&token).unwrap();
        assert!(claims.can_read());
        assert!(!claims.can_write());
        assert!(claims.require_read().is_ok());
        assert_eq!(claims.require_write(), Err(Error::ScopeDenied("write")));
    }

    #[test]
    fn scope_denial_surfaces_as_forbidden() {
        let tk = tokenizer();
        let token = tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Write], 600);
        let claims = tk.verify_magic_link(&token).unwrap();
        let err = claims.require_read().unwrap_err();
        assert_eq!(err, Error::ScopeDenied("read"));
        let mapped: meshdesk_common::Error = err.into();
        assert_eq!(mapped.kind, meshdesk_common::ErrorKind::Forbidden);
    }

    #[test]
    fn expired_token_fails_with_expired() {
        let tk = tokenizer();
        // Negative TTL beyond the skew allowance.
        let token = tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read], -120);
        assert_eq!(tk.verify_magic_link(&token), Err(Error::Expired));
    }

    #[test]
    fn skew_tolerance_accepts_just_expired() {
        let tk = tokenizer();
        // Expired 10s ago — inside the 60s skew window.
        let token = tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read], -10);
        assert!(tk.verify_magic_link(&token).is_ok());
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let tk = tokenizer();
        let token = tk.issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read], 600);
        let (body, sig) = token.split_once('.').unwrap();
        let mut payload = serde_json::from_slice::<serde_json::Value>(
            &URL_SAFE_NO_PAD.decode(body).unwrap(),
        )
        .unwrap();
        payload["tenant_id"] = "t2".into();
        let forged = format!(
            "{}.{sig}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap())
        );
        assert_eq!(
            tk.verify_magic_link(&forged),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn wrong_secret_fails_signature() {
        let token =
            tokenizer().issue_magic_link("t1", "p1", "tk1", "c1", vec![Scope::Read], 600);
        let other = Tokenizer::new(b"other-secret".to_vec());
        assert_eq!(other.verify_magic_link(&token), Err(Error::InvalidSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let tk = tokenizer();
        assert_eq!(tk.verify_magic_link("not-a-token"), Err(Error::Malformed));
        assert_eq!(tk.verify_magic_link("a.b.c"), Err(Error::Malformed));
        assert_eq!(tk.verify_magic_link(""), Err(Error::Malformed));
    }

    #[test]
    fn subjects_do_not_cross() {
        let tk = tokenizer();
        let visitor = tk.issue_visitor("t1", "s1", 600);
        // A visitor token is not accepted where a magic link is expected.
        assert!(tk.verify_magic_link(&visitor).is_err());
        // Nor where an agent bearer is expected.
        assert!(tk.verify_agent(&visitor).is_err());
    }

    #[test]
    fn visitor_token_round_trips() {
        let tk = tokenizer();
        let token = tk.issue_visitor("t1", "s1", 600);
        let claims = tk.verify_visitor(&token).unwrap();
        assert_eq!(claims.session_id, "s1");
        assert_eq!(claims.tenant_id, "t1");
    }

    #[test]
    fn agent_token_round_trips() {
        let tk = tokenizer();
        let token = tk.issue_agent("t1", "a1", "agent@example.com", 600);
        let claims = tk.verify_agent(&token).unwrap();
        assert_eq!(claims.agent_id, "a1");
        assert_eq!(claims.email, "agent@example.com");
    }

    #[test]
    fn jti_is_unique_per_issuance() {
        let tk = tokenizer();
        let a = tk
            .verify_magic_link(&tk.issue_magic_link("t", "p", "k", "c", vec![Scope::Read], 60))
            .unwrap();
        let b = tk
            .verify_magic_link(&tk.issue_magic_link("t", "p", "k", "c", vec![Scope::Read], 60))
            .unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
