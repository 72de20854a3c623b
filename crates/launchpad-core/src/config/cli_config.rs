//! CLI configuration file support.
//!
//! Settings that fill in launcher flags the user did not pass explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Directory for the summary CSV and framework logs
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Parent directory for timestamped model save directories
    #[serde(default)]
    pub model_save_root: Option<PathBuf>,

    /// Execution backend id
    #[serde(default)]
    pub backend: Option<String>,

    /// Seed for the synthetic backend
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum CliConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

/// Result type for configuration operations.
pub type CliConfigResult<T> = std::result::Result<T, CliConfigError>;

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> CliConfigResult<Self> {
        if !path.exists() {
            return Err(CliConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CliConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| CliConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".launchpad")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".launchpadrc")
    }

    /// Discover and load configuration files.
    ///
    /// Loads configuration from:
    /// 1. Global config (~/.launchpad/config.toml)
    /// 2. Local config (./.launchpadrc)
    ///
    /// Local config overrides global config. Unreadable files are skipped.
    pub fn discover_and_load() -> Self {
        let mut config = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(CliConfigError::NotFound(_)) => {}
                Err(e) => tracing::warn!("Ignoring configuration file: {}", e),
            }
        }

        config
    }

    /// Load an explicit file, or fall back to discovery when none is given.
    pub fn resolve(explicit: Option<&Path>) -> CliConfigResult<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::discover_and_load()),
        }
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
        if let Some(ref log_dir) = other.log_dir {
            self.log_dir = Some(log_dir.clone());
        }
        if let Some(ref root) = other.model_save_root {
            self.model_save_root = Some(root.clone());
        }
        if let Some(ref backend) = other.backend {
            self.backend = Some(backend.clone());
        }
        if other.seed.is_some() {
            self.seed = other.seed;
        }
    }
}
