//! Checkout handles

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use plugrack_plugin_api::Plugin;

static NEXT_RACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a rack, carried by every handle it issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RackId(u64);

impl RackId {
    pub(crate) fn next() -> Self {
        Self(NEXT_RACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A checked-out plugin.
///
/// Obtained from [`PluginRack::use_by_type`](super::PluginRack::use_by_type)
/// and returned with
/// [`PluginRack::finished_with_plugin`](super::PluginRack::finished_with_plugin).
/// Dereferences to the plugin instance for capability lookup.
///
/// The rack validates a handle on check-in: it must come from the same rack,
/// and from the current load of its entry (`generation`). A handle kept past
/// a purge and reload is rejected as stale.
///
/// Callers must check every handle in before the rack is destroyed. The
/// instance itself stays memory-safe past that point because the handle
/// shares ownership of it, but the rack no longer tracks it.
pub struct PluginHandle {
    pub(crate) rack: RackId,
    pub(crate) index: usize,
    pub(crate) generation: u64,
    path: PathBuf,
    plugin: Arc<dyn Plugin>,
}

impl PluginHandle {
    pub(crate) fn new(
        rack: RackId,
        index: usize,
        generation: u64,
        path: PathBuf,
        plugin: Arc<dyn Plugin>,
    ) -> Self {
        Self {
            rack,
            index,
            generation,
            path,
            plugin,
        }
    }

    /// Path of the module this handle came from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The checked-out plugin instance
    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Whether two handles refer to the same loaded instance
    pub fn same_instance(&self, other: &PluginHandle) -> bool {
        Arc::ptr_eq(&self.plugin, &other.plugin)
    }
}

impl Deref for PluginHandle {
    type Target = dyn Plugin;

    fn deref(&self) -> &Self::Target {
        self.plugin.as_ref()
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("rack", &self.rack)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
