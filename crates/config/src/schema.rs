use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8970,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://meshdesk.db?mode=rwc".into(),
        }
    }
}

/// Which coordination fabric backs pub/sub and the connection cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Single-instance mode: in-process hub, no external broker.
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            url: "redis://127.0.0.1:6379".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Symmetric secret signing every issued token. Required in production;
    /// the default exists so tests and first runs come up without a config
    /// file.
    pub token_secret: Secret<String>,
    /// Magic-link lifetime.
    pub magic_link_ttl_secs: i64,
    /// Visitor session token lifetime.
    pub visitor_token_ttl_secs: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn secret_bytes(&self) -> Vec<u8> {
        self.token_secret.expose_secret().as_bytes().to_vec()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: Secret::new("insecure-dev-secret".into()),
            magic_link_ttl_secs: 600,
            visitor_token_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Seconds of visitor silence before a session drops to `waiting`.
    pub inactivity_secs: i64,
    /// Sweep interval for the inactivity transition.
    pub sweep_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 300,
            sweep_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing env-filter directive, e.g. `info,meshdesk_gateway=debug`.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}
