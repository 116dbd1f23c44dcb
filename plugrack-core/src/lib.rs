//! plugrack-core: on-demand plugin loading by type
//!
//! A [`PluginRack`] catalogs the plugin modules found in one or more
//! directories, loads a module the first time a caller asks for its type,
//! and keeps it loaded while it is checked out. See [`plugins`] for the
//! lifecycle and an example.

pub mod plugins;

// Re-export key types for convenience
pub use plugins::{
    EntryInfo, EntryState, ErrorKind, PluginHandle, PluginLoader, PluginRack, RackConfig,
    RackError,
};
pub use plugrack_plugin_api::{Plugin, PluginDescriptor, PluginType};
