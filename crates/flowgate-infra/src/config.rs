//! Engine configuration loader.
//!
//! Reads `flowgate.toml` from the data directory (`~/.flowgate/` unless
//! `FLOWGATE_DATA_DIR` is set) or from an explicit path, and deserializes it
//! into [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed, then applies environment overrides and clamps invalid values.

use std::path::Path;

use flowgate_types::config::EngineConfig;

use crate::sqlite::pool::database_url_for;

pub const CONFIG_FILE_NAME: &str = "flowgate.toml";

/// Load configuration from `explicit` or `{data_dir}/flowgate.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or malformed file: a warning, then defaults.
/// - `FLOWGATE_DATABASE_URL` / `FLOWGATE_QUEUE_URL` override `[database]`.
/// - `database.url` falls back to `sqlite://{data_dir}/flowgate.db`.
pub async fn load_engine_config(data_dir: &Path, explicit: Option<&Path>) -> EngineConfig {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => data_dir.join(CONFIG_FILE_NAME),
    };

    let mut config = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => parse_config(&content, &config_path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", config_path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if config.database.url.is_none() {
        config.database.url = Some(database_url_for(data_dir));
    }

    for adjustment in config.normalize() {
        tracing::warn!(adjustment = %adjustment, "invalid configuration value adjusted");
    }
    config
}

fn parse_config(content: &str, path: &Path) -> EngineConfig {
    match toml::from_str::<EngineConfig>(content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Apply `FLOWGATE_*` overrides read through `lookup`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("FLOWGATE_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(url) = non_empty("FLOWGATE_QUEUE_URL") {
        config.database.queue_url = Some(url);
    }
}
