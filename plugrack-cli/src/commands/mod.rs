//! Subcommands of the `plugrack` binary

pub mod config;
pub mod plugin;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use plugrack_core::{PluginRack, RackConfig};

/// Options shared by every command that builds a rack
#[derive(Args, Debug, Default, Clone)]
pub struct RackArgs {
    /// Plugin directory to scan; repeat to scan several (replaces the configured list)
    #[arg(short, long = "dir", value_name = "DIR")]
    pub dirs: Vec<PathBuf>,

    /// Only catalog plugins of this major type
    #[arg(short = 't', long, value_name = "TYPE")]
    pub major_type: Option<String>,

    /// Configuration file [default: ~/.config/plugrack/rack.toml]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl RackArgs {
    /// Configuration file, then `PLUGRACK_PLUGIN_DIR`, then command-line flags
    pub fn resolve(&self) -> Result<RackConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(plugrack_paths::config_file);
        let mut config = RackConfig::load(&path)
            .with_context(|| format!("reading {}", path.display()))?
            .with_env_overrides();

        if !self.dirs.is_empty() {
            config.plugin_dirs = self.dirs.clone();
        }
        if self.major_type.is_some() {
            config.major_type = self.major_type.clone();
        }
        Ok(config)
    }

    /// Build a rack loading shared libraries and catalog the resolved directories
    pub fn open_rack(&self) -> Result<PluginRack> {
        let config = self.resolve()?;
        let rack = PluginRack::from_config(&config)?;
        tracing::debug!(entries = rack.len(), search_path = ?config.search_path().ok(), "Rack populated");
        Ok(rack)
    }
}
