//! Rack commands: list, load, use

use std::io::Write;

use anyhow::{Context, Result, bail};
use clap::Args;
use plugrack_core::PluginRack;

use super::RackArgs;

/// Arguments for `plugrack list`
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub rack: RackArgs,

    /// Print the catalog as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `plugrack load`
#[derive(Args, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    pub rack: RackArgs,
}

/// Arguments for `plugrack use`
#[derive(Args, Debug)]
pub struct UseArgs {
    #[command(flatten)]
    pub rack: RackArgs,

    /// Minor type to check out
    pub minor_type: String,

    /// Capability to invoke on the checked-out plugin
    #[arg(long, value_name = "CAPABILITY")]
    pub invoke: Option<String>,

    /// JSON input passed to the capability
    #[arg(long, value_name = "JSON", requires = "invoke", default_value = "null")]
    pub input: String,

    /// Unload idle plugins after checking the plugin back in
    #[arg(long)]
    pub purge: bool,
}

/// Run `plugrack list`
pub fn list(args: ListArgs) -> Result<()> {
    let rack = args.rack.open_rack()?;
    write_catalog(&rack, args.json, &mut std::io::stdout().lock())?;
    rack.destroy()?;
    Ok(())
}

/// Run `plugrack load`
pub fn load(args: LoadArgs) -> Result<()> {
    let rack = args.rack.open_rack()?;
    let result = rack.load_all();

    let mut out = std::io::stdout().lock();
    rack.print_all_plugins(&mut out)?;
    match result {
        Ok(loaded) => writeln!(out, "Loaded {loaded} plugin(s)")?,
        Err(e) => {
            rack.destroy()?;
            return Err(e).context("some plugins failed to load");
        }
    }

    rack.destroy()?;
    Ok(())
}

/// Run `plugrack use`
pub fn use_plugin(args: UseArgs) -> Result<()> {
    let rack = args.rack.open_rack()?;
    check_out(&rack, &args, &mut std::io::stdout().lock())?;
    rack.destroy()?;
    Ok(())
}

fn write_catalog<W: Write>(rack: &PluginRack, json: bool, out: &mut W) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, &rack.entries())?;
        writeln!(out)?;
        return Ok(());
    }

    if rack.is_empty() {
        writeln!(out, "No plugins found")?;
        writeln!(out)?;
        writeln!(
            out,
            "Plugin directory: {}",
            plugrack_paths::plugin_dir().display()
        )?;
        writeln!(out)?;
        writeln!(out, "To install a plugin, copy its library there, named <major>_<minor>.so:")?;
        writeln!(
            out,
            "  cp libhello_plugin.so {}",
            plugrack_paths::plugin_dir().join("greeter_hello.so").display()
        )?;
        return Ok(());
    }

    rack.print_all_plugins(out)?;
    Ok(())
}

fn check_out<W: Write>(rack: &PluginRack, args: &UseArgs, out: &mut W) -> Result<()> {
    let Some(plugin) = rack.use_by_type(&args.minor_type) else {
        bail!("no plugin of minor type '{}'", args.minor_type);
    };

    let descriptor = plugin.descriptor();
    writeln!(
        out,
        "{} v{} ({}) from {}",
        descriptor.name,
        descriptor.version,
        descriptor.plugin_type,
        plugin.path().display()
    )?;
    let capabilities = plugin.capabilities();
    if !capabilities.is_empty() {
        writeln!(out, "Capabilities: {}", capabilities.join(", "))?;
    }

    // Check the handle in even when the invocation fails.
    let invoked = match &args.invoke {
        Some(capability) => invoke(&plugin, capability, &args.input, out),
        None => Ok(()),
    };
    rack.finished_with_plugin(&plugin)?;
    invoked?;

    if args.purge {
        let purged = rack.purge_idle()?;
        writeln!(out, "Purged {purged} idle plugin(s)")?;
    }
    Ok(())
}

fn invoke<W: Write>(
    plugin: &plugrack_core::PluginHandle,
    capability: &str,
    input: &str,
    out: &mut W,
) -> Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(input).context("--input is not valid JSON")?;
    let output = plugin
        .invoke(capability, &input)
        .with_context(|| format!("invoking '{capability}'"))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
    Ok(())
}
