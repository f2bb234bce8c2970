//! broker.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration {0:?}: expected a number followed by ms, s, m, or h")]
    InvalidDuration(String),

    #[error("storage backend {0} requires a path")]
    MissingStoragePath(String),

    #[error("max_concurrent_operations must be at least 1")]
    NoWorkers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub operations: OperationsSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    /// JSON catalog file, relative to the config file's directory.
    pub catalog: PathBuf,
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsSection {
    /// How long a completed operation stays pollable.
    #[serde(default = "default_retention")]
    pub retention: String,
    #[serde(default = "default_reap_interval")]
    pub reap_interval: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redb,
}

fn default_max_concurrent_operations() -> usize {
    64
}

fn default_retention() -> String {
    "15m".to_string()
}

fn default_reap_interval() -> String {
    "60s".to_string()
}

impl Default for OperationsSection {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            reap_interval: default_reap_interval(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BrokerConfig = toml::from_str(&content)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal broker.toml.
    pub fn scaffold(catalog: &str) -> Self {
        BrokerConfig {
            broker: BrokerSection {
                catalog: PathBuf::from(catalog),
                max_concurrent_operations: default_max_concurrent_operations(),
            },
            operations: OperationsSection::default(),
            storage: StorageSection {
                backend: StorageBackend::Redb,
                path: Some(PathBuf::from("registry.redb")),
            },
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.max_concurrent_operations == 0 {
            return Err(ConfigError::NoWorkers);
        }
        self.retention()?;
        self.reap_interval()?;
        if self.storage.backend == StorageBackend::Redb && self.storage.path.is_none() {
            return Err(ConfigError::MissingStoragePath("redb".to_string()));
        }
        Ok(())
    }

    pub fn retention(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.operations.retention)
    }

    pub fn reap_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.operations.reap_interval)
    }

    /// Make relative paths relative to `base`.
    fn resolve_paths(&mut self, base: &Path) {
        if self.broker.catalog.is_relative() {
            self.broker.catalog = base.join(&self.broker.catalog);
        }
        if let Some(path) = self.storage.path.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Parse a duration such as `500ms`, `30s`, `15m`, or `2h`.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let (digits, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        return Err(invalid());
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|v| Duration::from_millis(v.saturating_mul(unit_ms)))
        .map_err(|_| invalid())
}
