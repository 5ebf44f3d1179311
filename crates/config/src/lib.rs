//! Server configuration: TOML schema, loader, `${ENV_VAR}` substitution.

pub mod loader;
pub mod schema;

mod env_subst;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        AuthConfig, CacheBackend, CacheConfig, ChatConfig, Config, DatabaseConfig, LogConfig,
        ServerConfig,
    },
};
