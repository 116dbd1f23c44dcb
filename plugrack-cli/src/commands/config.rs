use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use plugrack_core::RackConfig;

use super::RackArgs;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (file, environment and flags merged)
    Show {
        #[command(flatten)]
        rack: RackArgs,
    },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
        /// Where to write [default: ~/.config/plugrack/rack.toml]
        #[arg(long, value_name = "FILE")]
        config: Option<std::path::PathBuf>,
    },
    /// Show configuration file paths
    Path,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    let mut out = std::io::stdout().lock();
    match args.command {
        ConfigCommands::Show { rack } => show_config(&rack, &mut out),
        ConfigCommands::Init { force, config } => {
            let path = config.unwrap_or_else(plugrack_paths::config_file);
            init_config(&path, force, &mut out)
        }
        ConfigCommands::Path => show_paths(&mut out),
    }
}

fn show_config<W: Write>(rack: &RackArgs, out: &mut W) -> Result<()> {
    let config = rack.resolve()?;
    let toml_str = toml::to_string_pretty(&config)?;
    write!(out, "{toml_str}")?;
    Ok(())
}

fn init_config<W: Write>(path: &Path, force: bool, out: &mut W) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    RackConfig::default().save(path)?;
    writeln!(out, "Wrote {}", path.display())?;
    Ok(())
}

fn show_paths<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "Config file:      {}", plugrack_paths::config_file().display())?;
    writeln!(out, "Plugin directory: {}", plugrack_paths::plugin_dir().display())?;
    Ok(())
}
