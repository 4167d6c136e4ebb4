//! Service configuration (methodhub.toml)
//!
//! Every field has a default, so an absent or partial file is fine.
//! Environment variables override file values:
//!
//! | Variable                        | Field                |
//! |---------------------------------|----------------------|
//! | `METHODHUB_DATA_DIR`            | `data_dir`           |
//! | `METHODHUB_LOAD_TIMEOUT_MS`     | `load_timeout_ms`    |
//! | `METHODHUB_FUEL`                | `fuel`               |
//! | `METHODHUB_MAX_ARTIFACT_BYTES`  | `max_artifact_bytes` |
//! | `METHODHUB_MAX_CONCURRENT_LOADS`| `max_concurrent_loads` |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::plugin::LoadLimits;

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root directory for artifacts and method records
    pub data_dir: PathBuf,

    /// Wall-clock bound on loading one artifact
    pub load_timeout_ms: u64,

    /// Instruction budget for guest introspection
    pub fuel: u64,

    /// Uploads larger than this are rejected before loading
    pub max_artifact_bytes: usize,

    /// Cap on introspection workers alive at once
    pub max_concurrent_loads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let limits = LoadLimits::default();
        Self {
            data_dir: default_data_dir(),
            load_timeout_ms: limits.timeout.as_millis() as u64,
            fuel: limits.fuel,
            max_artifact_bytes: 16 * 1024 * 1024,
            max_concurrent_loads: limits.max_workers,
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env(&std::env::vars().collect())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file is given
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env(&std::env::vars().collect())?;
        Ok(config)
    }

    /// Apply overrides from a variable map (useful for testing)
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(dir) = env.get("METHODHUB_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_number(env, "METHODHUB_LOAD_TIMEOUT_MS")? {
            self.load_timeout_ms = v;
        }
        if let Some(v) = env_number(env, "METHODHUB_FUEL")? {
            self.fuel = v;
        }
        if let Some(v) = env_number(env, "METHODHUB_MAX_ARTIFACT_BYTES")? {
            self.max_artifact_bytes = v as usize;
        }
        if let Some(v) = env_number(env, "METHODHUB_MAX_CONCURRENT_LOADS")? {
            self.max_concurrent_loads = v as usize;
        }
        Ok(())
    }

    pub fn load_limits(&self) -> LoadLimits {
        LoadLimits {
            timeout: Duration::from_millis(self.load_timeout_ms),
            fuel: self.fuel,
            max_workers: self.max_concurrent_loads,
        }
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn methods_dir(&self) -> PathBuf {
        self.data_dir.join("methods")
    }
}

fn env_number(env: &HashMap<String, String>, var: &str) -> Result<Option<u64>, ConfigError> {
    match env.get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: value.clone(),
            }),
    }
}

/// Get the default data directory (~/.methodhub/)
fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".methodhub")
    } else {
        PathBuf::from(".methodhub")
    }
}
