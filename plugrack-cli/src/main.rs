use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "plugrack", about = "Load plugins on demand by type")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Catalog plugin directories and list what was found
    List(commands::plugin::ListArgs),
    /// Load every cataloged plugin and report failures
    Load(commands::plugin::LoadArgs),
    /// Check out a plugin by minor type, optionally invoking a capability
    Use(commands::plugin::UseArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List(args) => commands::plugin::list(args),
        Commands::Load(args) => commands::plugin::load(args),
        Commands::Use(args) => commands::plugin::use_plugin(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
