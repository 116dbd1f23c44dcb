//! Rack configuration - which directories to scan and which major type to keep

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::error::RackError;

/// Environment variable overriding `plugin_dirs` with a search path
pub const PLUGIN_DIR_ENV: &str = "PLUGRACK_PLUGIN_DIR";

/// Rack configuration
///
/// Stored as TOML in `~/.config/plugrack/rack.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackConfig {
    /// Directories scanned in order; earlier directories win ties
    #[serde(default = "default_plugin_dirs")]
    pub plugin_dirs: Vec<PathBuf>,
    /// Only catalog plugins of this major type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_type: Option<String>,
}

fn default_plugin_dirs() -> Vec<PathBuf> {
    vec![plugrack_paths::plugin_dir()]
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: default_plugin_dirs(),
            major_type: None,
        }
    }
}

impl RackConfig {
    /// Load configuration from a TOML file
    ///
    /// Returns the default configuration if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, RackError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| RackError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), RackError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| RackError::Config(e.to_string()))?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Replace `plugin_dirs` with the search path in [`PLUGIN_DIR_ENV`], if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(search_path) = std::env::var_os(PLUGIN_DIR_ENV).filter(|v| !v.is_empty()) {
            self.plugin_dirs = std::env::split_paths(&search_path).collect();
            tracing::debug!(dirs = ?self.plugin_dirs, "Plugin directories taken from {PLUGIN_DIR_ENV}");
        }
        self
    }

    /// `plugin_dirs` joined with the platform path separator
    pub fn search_path(&self) -> Result<OsString, RackError> {
        std::env::join_paths(&self.plugin_dirs).map_err(|e| RackError::Config(e.to_string()))
    }
}
