use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::Config};

/// Default config file name, checked in the working directory.
const CONFIG_FILENAME: &str = "meshdesk.toml";

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config: Config =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config: `$MESHDESK_CONFIG`, then `./meshdesk.toml`,
/// then built-in defaults. Environment overrides apply in every case.
pub fn discover_and_load() -> Config {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(config) => return config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    config
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("MESHDESK_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let local = PathBuf::from(CONFIG_FILENAME);
    local.exists().then_some(local)
}

/// Environment variables override the file for the deploy-sensitive values.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(bind) = std::env::var("MESHDESK_BIND") {
        config.server.bind = bind;
    }
    if let Ok(port) = std::env::var("MESHDESK_PORT")
        && let Ok(port) = port.parse()
    {
        config.server.port = port;
    }
    if let Ok(url) = std::env::var("MESHDESK_DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(url) = std::env::var("MESHDESK_CACHE_URL") {
        config.cache.url = url;
    }
    if let Ok(secret) = std::env::var("MESHDESK_TOKEN_SECRET") {
        config.auth.token_secret = secrecy::Secret::new(secret);
    }
}
