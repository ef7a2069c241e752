//! Database configuration via `turf.toml`
//!
//! On first open, a default `turf.toml` is written to the data directory. To
//! change settings, edit the file and reopen the database.

use serde::{Deserialize, Serialize};
use std::path::Path;
use turf_core::{Error, Result};
use turf_storage::SyncMode;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "turf.toml";

/// Data file name placed in the database data directory.
pub const DATA_FILE_NAME: &str = "turf.db";

/// Default number of snapshots of cache updates kept for lagging connections.
pub const DEFAULT_CACHE_UPDATE_RETENTION: usize = 4096;

/// Database configuration loaded from `turf.toml`.
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// cache_update_retention = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurfConfig {
    /// Durability mode: `"standard"` or `"always"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Snapshots of cache updates retained even if a connection still needs
    /// older ones (0 = keep everything a live connection needs).
    #[serde(default = "default_cache_update_retention")]
    pub cache_update_retention: usize,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_cache_update_retention() -> usize {
    DEFAULT_CACHE_UPDATE_RETENTION
}

impl Default for TurfConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            cache_update_retention: default_cache_update_retention(),
        }
    }
}

impl TurfConfig {
    /// Parse the durability string into a `SyncMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"standard"` or `"always"`.
    pub fn sync_mode(&self) -> Result<SyncMode> {
        match self.durability.as_str() {
            "standard" => Ok(SyncMode::Standard),
            "always" => Ok(SyncMode::Always),
            other => Err(Error::ConfigError(format!(
                "Invalid durability mode '{}' in turf.toml. Expected \"standard\" or \"always\".",
                other
            ))),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Turf database configuration
#
# Durability mode: "standard" (default) or "always"
#   "standard" = data file replaced on every commit, no fsync
#   "always"   = data file fsynced on every commit
durability = "standard"

# Snapshots of cache updates kept for connections that have not caught up.
# A connection lagging further behind must reset its caches.
# 0 keeps everything any live connection still needs.
cache_update_retention = 4096
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TurfConfig = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        // Validate the durability value eagerly
        config.sync_mode()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
