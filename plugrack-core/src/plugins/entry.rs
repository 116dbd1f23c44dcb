//! Per-module bookkeeping: path, type, load state and reference count

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plugrack_plugin_api::{Plugin, PluginType};
use serde::Serialize;

use super::error::RackError;

/// Load state of a cataloged module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Cataloged, not loaded
    Discovered,
    /// Loaded, nobody has it checked out
    LoadedIdle,
    /// Loaded and checked out at least once
    LoadedInUse,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::LoadedIdle => "idle",
            Self::LoadedInUse => "in-use",
        };
        f.write_str(s)
    }
}

/// A module known to the rack.
///
/// The fields are private so every transition goes through the methods
/// below, which keep `state`, `ref_count` and `module` consistent.
pub(crate) struct PluginEntry {
    full_path: PathBuf,
    plugin_type: Option<PluginType>,
    state: EntryState,
    ref_count: usize,
    module: Option<Arc<dyn Plugin>>,
    /// Bumped on every load so handles from an earlier load go stale
    generation: u64,
}

impl PluginEntry {
    pub(crate) fn discovered(full_path: PathBuf, plugin_type: Option<PluginType>) -> Self {
        Self {
            full_path,
            plugin_type,
            state: EntryState::Discovered,
            ref_count: 0,
            module: None,
            generation: 0,
        }
    }

    pub(crate) fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub(crate) fn plugin_type(&self) -> Option<&PluginType> {
        self.plugin_type.as_ref()
    }

    pub(crate) fn state(&self) -> EntryState {
        self.state
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    /// Minor type matches and, when a filter is given, so does the major type
    pub(crate) fn matches(&self, minor_type: &str, major_filter: Option<&str>) -> bool {
        match &self.plugin_type {
            Some(t) => t.minor == minor_type && major_filter.is_none_or(|major| t.major == major),
            None => false,
        }
    }

    /// `Discovered -> LoadedIdle`. The module's own descriptor becomes the
    /// authoritative type.
    pub(crate) fn attach(&mut self, module: Arc<dyn Plugin>) {
        debug_assert_eq!(self.state, EntryState::Discovered);
        self.plugin_type = Some(module.descriptor().plugin_type);
        self.module = Some(module);
        self.state = EntryState::LoadedIdle;
        self.ref_count = 0;
        self.generation += 1;
    }

    /// `LoadedIdle | LoadedInUse -> LoadedInUse`; `None` when not loaded
    pub(crate) fn checkout(&mut self) -> Option<Arc<dyn Plugin>> {
        let module = Arc::clone(self.module.as_ref()?);
        self.ref_count += 1;
        self.state = EntryState::LoadedInUse;
        Some(module)
    }

    /// `LoadedInUse -> LoadedInUse | LoadedIdle`
    pub(crate) fn checkin(&mut self) -> Result<usize, RackError> {
        if self.ref_count == 0 {
            return Err(RackError::RefCountUnderflow {
                path: self.full_path.clone(),
            });
        }
        self.ref_count -= 1;
        if self.ref_count == 0 {
            self.state = EntryState::LoadedIdle;
        }
        Ok(self.ref_count)
    }

    /// Back to `Discovered`, handing the module to the caller for closing.
    /// The learned type is kept so later scans need not reload.
    pub(crate) fn detach(&mut self) -> Option<Arc<dyn Plugin>> {
        self.state = EntryState::Discovered;
        self.ref_count = 0;
        self.module.take()
    }

    pub(crate) fn info(&self) -> EntryInfo {
        EntryInfo {
            full_path: self.full_path.clone(),
            plugin_type: self.plugin_type.as_ref().map(ToString::to_string),
            state: self.state,
            ref_count: self.ref_count,
            version: self.module.as_ref().map(|m| m.descriptor().version),
        }
    }
}

/// Snapshot of one entry, for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    /// Module path
    pub full_path: PathBuf,
    /// `major/minor`, when known
    pub plugin_type: Option<String>,
    /// Current state
    pub state: EntryState,
    /// Outstanding checkouts
    pub ref_count: usize,
    /// Version reported by the loaded instance
    pub version: Option<String>,
}

impl fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  {}  refs={}",
            self.full_path.display(),
            self.plugin_type.as_deref().unwrap_or("<unknown>"),
            self.state,
            self.ref_count
        )
    }
}
