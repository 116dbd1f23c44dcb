//! Plugin rack
//!
//! This module provides the catalog that loads plugins on demand and hands
//! them out by type:
//!
//! - [`PluginRack`]: catalog of plugin modules with checkout/check-in
//! - [`PluginLoader`]: probes, opens and closes modules ([`DynamicLoader`] for
//!   shared libraries, [`MockLoader`] for in-process plugins)
//! - [`CandidateSource`]: lists the files of a plugin directory
//! - [`RackError`]: error types for rack operations
//!
//! # Plugin Discovery
//!
//! [`PluginRack::read_dir`] accepts a single directory or a search path.
//! Every file with a shared-library extension is probed for its
//! `major/minor` type without being initialised. When the rack has a major
//! type filter, modules of other major types are not cataloged.
//!
//! # Lifecycle
//!
//! ```text
//! Discovered ──load──▶ LoadedIdle ──checkout──▶ LoadedInUse
//!     ▲                  │   ▲                     │
//!     └──purge / destroy─┘   └──check-in (last)────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use plugrack_core::plugins::PluginRack;
//!
//! # fn main() -> Result<(), plugrack_core::plugins::RackError> {
//! let rack = PluginRack::new();
//! rack.set_major_type(Some("auth"))?;
//! rack.read_dir("/usr/lib/plugrack")?;
//!
//! if let Some(plugin) = rack.use_by_type("munge") {
//!     println!("using {}", plugin.descriptor().name);
//!     rack.finished_with_plugin(&plugin)?;
//! }
//!
//! rack.destroy()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod discovery;
mod entry;
mod error;
mod handle;
mod loader;
pub mod mock;
mod rack;

pub use config::{PLUGIN_DIR_ENV, RackConfig};
pub use discovery::{CandidateSource, FsCandidates, PLUGIN_EXTENSIONS, name_matches_major};
pub use entry::{EntryInfo, EntryState};
pub use error::{EntryFailure, ErrorKind, RackError};
pub use handle::{PluginHandle, RackId};
pub use loader::{DynamicLoader, PluginLoader};
pub use mock::{MockLoader, MockModule, MockPlugin};
pub use rack::PluginRack;
