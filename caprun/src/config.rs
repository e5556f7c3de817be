//! Engine configuration.
//!
//! Constructed once at process start (seeded from the environment, optionally
//! overlaid from a TOML file) and passed by reference into the engine — there
//! is no global configuration state. The engine itself only reads backend
//! selection and option bundles; everything else is policy data for callers
//! and backends.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub docker: DockerOptions,
    #[serde(default)]
    pub windmill: WindmillOptions,
    /// Log verbosity hint for the embedding process ("error".."trace").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            docker: DockerOptions::default(),
            windmill: WindmillOptions::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Default backend used when the caller does not request one.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Default timeout in milliseconds. The engine does not interrupt a hung
    /// task itself; backends that can honor a deadline use this value.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Options for the containerized backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerOptions {
    /// CLI binary to drive ("docker" or a compatible drop-in).
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    /// Image the per-run container is started from.
    #[serde(default = "default_docker_image")]
    pub image: String,
    /// Memory limit for the container; capability resource hints fill this
    /// in when the caller leaves it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            image: default_docker_image(),
            memory_mb: None,
        }
    }
}

/// Options for the remote-workflow backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindmillOptions {
    #[serde(default = "default_windmill_base_url")]
    pub base_url: String,
    #[serde(default = "default_windmill_workspace")]
    pub workspace: String,
    /// Access token; construction of the backend fails without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Request timeout override; falls back to `execution.timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for WindmillOptions {
    fn default() -> Self {
        Self {
            base_url: default_windmill_base_url(),
            workspace: default_windmill_workspace(),
            token: None,
            timeout_ms: None,
        }
    }
}

fn default_environment() -> String {
    "local".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_docker_image() -> String {
    "node:20-alpine".to_string()
}

fn default_windmill_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_windmill_workspace() -> String {
    "main".to_string()
}

impl EngineConfig {
    /// Seed a configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("CAPRUN_EXECUTION_ENVIRONMENT") {
            config.execution.environment = v;
        }
        if let Ok(v) = std::env::var("CAPRUN_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                config.execution.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CAPRUN_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("CAPRUN_DOCKER_IMAGE") {
            config.docker.image = v;
        }
        if let Ok(v) = std::env::var("WINDMILL_BASE_URL") {
            config.windmill.base_url = v;
        }
        if let Ok(v) = std::env::var("WINDMILL_WORKSPACE") {
            config.windmill.workspace = v;
        }
        if let Ok(v) = std::env::var("WINDMILL_TOKEN") {
            config.windmill.token = Some(v);
        }
        config
    }

    /// Overlay values from a TOML file; file values win over current ones.
    pub fn overlay_file(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let overlay: toml::Value = text
            .parse()
            .map_err(|e| EngineError::Config(format!("cannot parse config file: {}", e)))?;
        let mut base = toml::Value::try_from(self.clone())
            .map_err(|e| EngineError::Config(e.to_string()))?;
        merge(&mut base, overlay);
        *self = base
            .try_into()
            .map_err(|e: toml::de::Error| EngineError::Config(e.to_string()))?;
        Ok(())
    }

    /// Read-only dotted-path lookup (`"section.option"`).
    pub fn get(&self, key: &str) -> Option<toml::Value> {
        let mut current = toml::Value::try_from(self.clone()).ok()?;
        for segment in key.split('.') {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
