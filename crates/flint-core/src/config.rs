//! Configuration management for Flint.
//!
//! This module provides configuration loading, saving, and defaults.
//! Configuration is stored in TOML format in a platform-appropriate location.

use crate::error::{FlintError, Result};
use crate::types::Priority;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure for Flint.
///
/// ## Example Configuration File (flint.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
///
/// [indexing]
/// threads = 10
/// single_thread = false
/// shutdown_timeout_secs = 5
///
/// [open_indexes]
/// max_open = 100
/// sweep_interval_secs = 1800
///
/// [local]
/// include = ["*.xml", "*.txt"]
/// exclude_dirs = [".git", "target"]
/// priority = "low"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Worker pools
    pub indexing: IndexingConfig,

    /// Open index handle cache
    pub open_indexes: OpenIndexesConfig,

    /// Local folder indexing
    pub local: LocalConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Number of threads draining the multi-worker lane
    pub threads: usize,

    /// Start a dedicated single-worker lane
    pub single_thread: bool,

    /// Seconds to wait for running jobs at shutdown
    pub shutdown_timeout_secs: u64,

    /// Prefix of worker thread names
    pub thread_name_prefix: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        IndexingConfig {
            threads: 10,
            single_thread: false,
            shutdown_timeout_secs: 5,
            thread_name_prefix: "indexing".to_string(),
        }
    }
}

/// Open index cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenIndexesConfig {
    /// Maximum number of open index handles
    pub max_open: usize,

    /// Minimum seconds between two sweeps
    pub sweep_interval_secs: u64,
}

impl Default for OpenIndexesConfig {
    fn default() -> Self {
        OpenIndexesConfig {
            max_open: 100,
            sweep_interval_secs: 30 * 60,
        }
    }
}

/// Local folder indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// File name globs to index (empty = all files)
    pub include: Vec<String>,

    /// Directory globs to skip
    pub exclude_dirs: Vec<String>,

    /// Follow symbolic links
    pub follow_links: bool,

    /// Priority of submitted jobs
    pub priority: Priority,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            include: Vec::new(),
            exclude_dirs: Vec::new(),
            follow_links: true,
            priority: Priority::Low,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| FlintError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self).map_err(|e| FlintError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "flint").ok_or_else(|| FlintError::ConfigError {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("flint.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexing.threads, 10);
        assert!(!config.indexing.single_thread);
        assert_eq!(config.open_indexes.max_open, 100);
        assert_eq!(config.open_indexes.sweep_interval_secs, 1800);
        assert_eq!(config.local.priority, Priority::Low);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("flint.toml");

        let mut config = Config::default();
        config.indexing.threads = 4;
        config.local.include = vec!["*.xml".to_string()];
        config.local.priority = Priority::High;

        config.save_to(&config_path).unwrap();
        let loaded = Config::load_from(&config_path).unwrap();

        assert_eq!(loaded.indexing.threads, 4);
        assert_eq!(loaded.local.include, vec!["*.xml".to_string()]);
        assert_eq!(loaded.local.priority, Priority::High);
    }

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.indexing.threads, 10); // Default value
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flint.toml");
        fs::write(&config_path, "[indexing]\nsingle_thread = true\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert!(config.indexing.single_thread);
        assert_eq!(config.indexing.threads, 10);
        assert!(config.local.follow_links);
    }

    #[test]
    fn test_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("flint.toml");
        fs::write(&config_path, "[indexing\nthreads = ").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(err.is_configuration());
    }
}
