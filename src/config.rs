//! Engine configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.

use crate::reconcile::ReconcileSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Tunables for a [`GraphEngine`](crate::GraphEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file; `None` keeps the graph in memory
    pub database_path: Option<PathBuf>,
    pub validation_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub inference_concurrency: usize,
    /// Filter for `telemetry::init_logging`
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            validation_timeout_ms: 5_000,
            inference_timeout_ms: 30_000,
            inference_concurrency: 4,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            validation_timeout: Duration::from_millis(self.validation_timeout_ms),
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            inference_concurrency: self.inference_concurrency.max(1),
        }
    }
}

/// Get the default database path (~/.local/share/stategraph/stategraph.db)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("stategraph").join("stategraph.db")
}
