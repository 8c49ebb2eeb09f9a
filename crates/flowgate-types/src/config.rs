//! Engine configuration types.
//!
//! `EngineConfig` represents the `flowgate.toml` file in the data directory.
//! Every field has a default, so an empty or missing file is valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::output::OutputFieldType;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub activity: ActivityOptions,
    #[serde(default)]
    pub registry: RegistryLimits,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Entity types known to the bundled entity store, used to check
    /// action-node payloads at publish time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityTypeConfig>,
}

impl EngineConfig {
    /// Clamp values that would make the engine misbehave, returning a
    /// description of every adjustment made.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut adjustments = Vec::new();
        if self.dispatcher.batch_size == 0 {
            self.dispatcher.batch_size = 1;
            adjustments.push("dispatcher.batch_size raised to 1".to_string());
        }
        if self.dispatcher.stale_after_secs == 0 {
            self.dispatcher.stale_after_secs = 1;
            adjustments.push("dispatcher.stale_after_secs raised to 1".to_string());
        } else if self.dispatcher.stale_after_secs > MAX_STALE_AFTER_SECS {
            self.dispatcher.stale_after_secs = MAX_STALE_AFTER_SECS;
            adjustments.push(format!(
                "dispatcher.stale_after_secs lowered to {MAX_STALE_AFTER_SECS}"
            ));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            self.dispatcher.poll_interval_ms = default_poll_interval_ms();
            adjustments.push(format!(
                "dispatcher.poll_interval_ms reset to {}",
                self.dispatcher.poll_interval_ms
            ));
        } else if self.dispatcher.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            self.dispatcher.poll_interval_ms = MAX_POLL_INTERVAL_MS;
            adjustments.push(format!(
                "dispatcher.poll_interval_ms lowered to {MAX_POLL_INTERVAL_MS}"
            ));
        }
        if self.dispatcher.sweep_interval_secs == 0 {
            self.dispatcher.sweep_interval_secs = default_sweep_interval_secs();
            adjustments.push(format!(
                "dispatcher.sweep_interval_secs reset to {}",
                self.dispatcher.sweep_interval_secs
            ));
        } else if self.dispatcher.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            self.dispatcher.sweep_interval_secs = MAX_SWEEP_INTERVAL_SECS;
            adjustments.push(format!(
                "dispatcher.sweep_interval_secs lowered to {MAX_SWEEP_INTERVAL_SECS}"
            ));
        }
        if self.activity.max_attempts == 0 {
            self.activity.max_attempts = 1;
            adjustments.push("activity.max_attempts raised to 1".to_string());
        }
        if self.registry.max_registry_bytes < self.registry.max_step_output_bytes {
            self.registry.max_registry_bytes = self.registry.max_step_output_bytes;
            adjustments.push(
                "registry.max_registry_bytes raised to registry.max_step_output_bytes".to_string(),
            );
        }
        adjustments
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL for definitions, executions and audit records.
    /// Defaults to `sqlite://{data_dir}/flowgate.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// PostgreSQL URL for a shared admission queue. When unset, the queue
    /// lives in the SQLite database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
}

/// Upper bound for `dispatcher.stale_after_secs` (one week).
pub const MAX_STALE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;
/// Upper bound for `dispatcher.poll_interval_ms` (one hour).
pub const MAX_POLL_INTERVAL_MS: u64 = 60 * 60 * 1000;
/// Upper bound for `dispatcher.sweep_interval_secs` (one day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum rows claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A `claimed` row older than this is reset to `pending`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_batch_size() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Options forwarded to the execution host for every node activity.
///
/// Retry policy belongs to the host; `max_attempts` is passed through
/// untouched for hosts that retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityOptions {
    #[serde(default = "default_start_to_close_timeout_secs")]
    pub start_to_close_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_start_to_close_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout_secs: default_start_to_close_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Size limits for the per-run data registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryLimits {
    /// Max serialized size of one step output (1 MB).
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: usize,
    /// Max serialized size of all step outputs in a run (10 MB).
    #[serde(default = "default_max_registry_bytes")]
    pub max_registry_bytes: usize,
}

fn default_max_step_output_bytes() -> usize {
    1_048_576
}

fn default_max_registry_bytes() -> usize {
    10_485_760
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_step_output_bytes: default_max_step_output_bytes(),
            max_registry_bytes: default_max_registry_bytes(),
        }
    }
}

/// Field schema of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, OutputFieldType>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.dispatcher.stale_after_secs, 300);
        assert_eq!(config.activity.max_attempts, 3);
        assert_eq!(config.registry.max_step_output_bytes, 1_048_576);
        assert_eq!(config.logging.filter, "info");
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_empty() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.dispatcher.poll_interval_ms, 500);
        assert_eq!(config.registry.max_registry_bytes, 10_485_760);
    }

    #[test]
    fn test_engine_config_deserialize_partial_section() {
        let toml_str = r#"
[database]
queue_url = "postgres://localhost/flowgate"

[dispatcher]
batch_size = 25

[activity]
max_attempts = 5

[logging]
json = true
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dispatcher.batch_size, 25);
        assert_eq!(config.dispatcher.sweep_interval_secs, 60);
        assert_eq!(config.activity.max_attempts, 5);
        assert_eq!(config.activity.start_to_close_timeout_secs, 300);
        assert!(config.logging.json);
        assert_eq!(
            config.database.queue_url.as_deref(),
            Some("postgres://localhost/flowgate")
        );
    }

    #[test]
    fn test_engine_config_entity_types() {
        let toml_str = r#"
[[entities]]
name = "ticket"
required = ["title"]

[entities.fields]
title = "string"
priority = "integer"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.entities.len(), 1);
        let ticket = &config.entities[0];
        assert_eq!(ticket.fields["priority"], OutputFieldType::Integer);
        assert_eq!(ticket.required, vec!["title".to_string()]);
    }

    #[test]
    fn test_normalize_clamps_zeroes() {
        let mut config = EngineConfig::default();
        config.dispatcher.batch_size = 0;
        config.activity.max_attempts = 0;
        config.registry.max_registry_bytes = 10;
        let adjustments = config.normalize();
        assert_eq!(adjustments.len(), 3);
        assert_eq!(config.dispatcher.batch_size, 1);
        assert_eq!(config.activity.max_attempts, 1);
        assert_eq!(
            config.registry.max_registry_bytes,
            config.registry.max_step_output_bytes
        );
    }

    #[test]
    fn test_normalize_caps_huge_dispatcher_values() {
        let mut config = EngineConfig::default();
        config.dispatcher.stale_after_secs = 10_000_000_000_000;
        config.dispatcher.poll_interval_ms = u64::MAX;
        config.dispatcher.sweep_interval_secs = u64::MAX;
        let adjustments = config.normalize();
        assert_eq!(adjustments.len(), 3);
        assert_eq!(config.dispatcher.stale_after_secs, MAX_STALE_AFTER_SECS);
        assert_eq!(config.dispatcher.poll_interval_ms, MAX_POLL_INTERVAL_MS);
        assert_eq!(config.dispatcher.sweep_interval_secs, MAX_SWEEP_INTERVAL_SECS);
    }

    #[test]
    fn test_normalize_leaves_valid_config() {
        let mut config = EngineConfig::default();
        assert!(config.normalize().is_empty());
    }
}
