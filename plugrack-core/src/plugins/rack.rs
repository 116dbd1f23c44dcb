//! PluginRack - catalog of plugin modules with checkout/check-in by type

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::config::RackConfig;
use super::discovery::{CandidateSource, FsCandidates, name_matches_major};
use super::entry::{EntryInfo, EntryState, PluginEntry};
use super::error::{EntryFailure, RackError};
use super::handle::{PluginHandle, RackId};
use super::loader::{DynamicLoader, PluginLoader};

/// Catalog state guarded by the rack lock
#[derive(Default)]
struct RackInner {
    major_type: Option<String>,
    entries: Vec<PluginEntry>,
}

impl RackInner {
    fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.full_path() == path)
    }
}

/// A plugin rack.
///
/// Entries are cataloged by [`read_dir`](Self::read_dir), loaded lazily by
/// [`use_by_type`](Self::use_by_type) or eagerly by
/// [`load_all`](Self::load_all), and unloaded only by
/// [`purge_idle`](Self::purge_idle) or when the rack is destroyed. Checking a
/// plugin in never unloads it, so bursts of short checkouts reuse the
/// loaded instance.
///
/// All operations take the same lock, and loader calls happen while it is
/// held, so a module is never loaded twice and a purge cannot race a
/// checkout of the same entry.
pub struct PluginRack {
    id: RackId,
    loader: Arc<dyn PluginLoader>,
    source: Arc<dyn CandidateSource>,
    inner: Mutex<RackInner>,
}

impl PluginRack {
    /// Create an empty rack loading shared libraries from the file system
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(DynamicLoader::new()), Arc::new(FsCandidates::new()))
    }

    /// Create an empty rack with the given loader and candidate source
    pub fn with_collaborators(
        loader: Arc<dyn PluginLoader>,
        source: Arc<dyn CandidateSource>,
    ) -> Self {
        Self {
            id: RackId::next(),
            loader,
            source,
            inner: Mutex::new(RackInner::default()),
        }
    }

    /// Create a rack loading shared libraries and apply `config` to it.
    ///
    /// See [`apply_config`](Self::apply_config).
    pub fn from_config(config: &RackConfig) -> Result<Self, RackError> {
        let rack = Self::new();
        let added = rack.apply_config(config)?;
        tracing::debug!(rack = ?rack.id, added, "Rack created from configuration");
        Ok(rack)
    }

    /// Apply a configuration: set its major type and scan its directories.
    ///
    /// Directories that cannot be listed are logged and skipped. Returns the
    /// number of newly cataloged entries.
    pub fn apply_config(&self, config: &RackConfig) -> Result<usize, RackError> {
        self.set_major_type(config.major_type.as_deref())?;

        let mut added = 0;
        for dir in &config.plugin_dirs {
            match self.read_dir(dir) {
                Ok(n) => added += n,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping plugin directory");
                }
            }
        }
        Ok(added)
    }

    fn lock(&self) -> MutexGuard<'_, RackInner> {
        // Entries are consistent between statements, so a panic elsewhere
        // never leaves a half-updated catalog behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restrict subsequent discovery to one major type, or lift the
    /// restriction with `None`. Already cataloged entries are kept.
    pub fn set_major_type(&self, major_type: Option<&str>) -> Result<(), RackError> {
        if let Some(major) = major_type {
            if major.is_empty() || major.contains('/') {
                return Err(RackError::InvalidArgument(format!(
                    "invalid major type '{major}'"
                )));
            }
        }

        self.lock().major_type = major_type.map(str::to_string);
        tracing::debug!(rack = ?self.id, major_type = ?major_type, "Major type filter set");
        Ok(())
    }

    /// Current major type filter
    pub fn major_type(&self) -> Option<String> {
        self.lock().major_type.clone()
    }

    /// Catalog the plugin modules found in `path`.
    ///
    /// `path` may be a search path of several directories joined by the
    /// platform path separator; each is scanned in order. Candidates that
    /// cannot be probed are skipped with a warning, and paths already in the
    /// catalog are left alone. Returns the number of new entries, or the
    /// first directory error after all directories were attempted.
    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<usize, RackError> {
        let dirs: Vec<PathBuf> = std::env::split_paths(path.as_ref().as_os_str())
            .filter(|d| !d.as_os_str().is_empty())
            .collect();
        if dirs.is_empty() {
            return Err(RackError::InvalidArgument(
                "empty plugin directory".to_string(),
            ));
        }

        let mut inner = self.lock();
        let mut added = 0;
        let mut first_error = None;

        for dir in &dirs {
            match self.read_single_dir(&mut inner, dir) {
                Ok(n) => added += n,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot read plugin directory");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(added),
        }
    }

    fn read_single_dir(&self, inner: &mut RackInner, dir: &Path) -> Result<usize, RackError> {
        let candidates = self.source.list_candidate_files(dir)?;
        let mut added = 0;

        for path in candidates {
            if inner.contains(&path) {
                tracing::trace!(path = %path.display(), "Plugin already cataloged");
                continue;
            }

            let plugin_type = match self.loader.probe(&path) {
                Ok(Some(descriptor)) => {
                    if inner
                        .major_type
                        .as_deref()
                        .is_some_and(|major| descriptor.major_type() != major)
                    {
                        tracing::debug!(
                            path = %path.display(),
                            plugin_type = %descriptor.plugin_type,
                            "Skipping plugin of another major type"
                        );
                        continue;
                    }
                    Some(descriptor.plugin_type)
                }
                Ok(None) => {
                    // Type unknown until loaded; fall back to the file name.
                    if let Some(major) = inner.major_type.as_deref() {
                        if !name_matches_major(&path, major) {
                            tracing::debug!(
                                path = %path.display(),
                                major_type = %major,
                                "Skipping plugin whose name is outside the major type"
                            );
                            continue;
                        }
                    }
                    None
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping plugin that could not be probed");
                    continue;
                }
            };

            inner
                .entries
                .try_reserve(1)
                .map_err(|e| RackError::ResourceExhausted(e.to_string()))?;

            match &plugin_type {
                Some(t) => tracing::debug!(path = %path.display(), plugin_type = %t, "Plugin cataloged"),
                None => tracing::debug!(path = %path.display(), "Plugin cataloged, type unknown until loaded"),
            }
            inner.entries.push(PluginEntry::discovered(path, plugin_type));
            added += 1;
        }

        Ok(added)
    }

    /// Open one entry and move it to `LoadedIdle`
    fn open_entry(&self, entry: &mut PluginEntry) -> Result<(), RackError> {
        let module = self.loader.open(entry.full_path())?;
        let descriptor = module.descriptor();

        if let Some(known) = entry.plugin_type() {
            if *known != descriptor.plugin_type {
                tracing::warn!(
                    path = %entry.full_path().display(),
                    probed = %known,
                    loaded = %descriptor.plugin_type,
                    "Loaded plugin reports a different type than its probe"
                );
            }
        }

        entry.attach(module);
        tracing::info!(
            path = %entry.full_path().display(),
            plugin_type = %descriptor.plugin_type,
            version = %descriptor.version,
            "Plugin loaded"
        );
        Ok(())
    }

    /// Load every entry that is not loaded yet.
    ///
    /// A failing entry stays `Discovered`; the others are still loaded and
    /// the failures are reported together afterwards. Returns the number of
    /// entries loaded by this call.
    pub fn load_all(&self) -> Result<usize, RackError> {
        let mut inner = self.lock();
        let mut attempted = 0;
        let mut loaded = 0;
        let mut failures = Vec::new();

        for entry in inner.entries.iter_mut().filter(|e| !e.is_loaded()) {
            attempted += 1;
            match self.open_entry(entry) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::error!(path = %entry.full_path().display(), error = %e, "Failed to load plugin");
                    failures.push(EntryFailure {
                        path: entry.full_path().to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(RackError::BatchFailure {
                operation: "load_all",
                attempted,
                failures,
            })
        }
    }

    /// Unload every loaded entry nobody has checked out.
    ///
    /// Purged entries return to `Discovered` and keep their type. A close
    /// error is reported but the entry is still considered unloaded.
    /// Returns the number of entries purged.
    pub fn purge_idle(&self) -> Result<usize, RackError> {
        let mut inner = self.lock();
        let mut attempted = 0;
        let mut failures = Vec::new();

        for entry in inner
            .entries
            .iter_mut()
            .filter(|e| e.state() == EntryState::LoadedIdle)
        {
            let Some(module) = entry.detach() else {
                continue;
            };
            attempted += 1;
            match self.loader.close(entry.full_path(), module) {
                Ok(()) => {
                    tracing::debug!(path = %entry.full_path().display(), "Idle plugin unloaded");
                }
                Err(e) => {
                    tracing::warn!(path = %entry.full_path().display(), error = %e, "Error unloading idle plugin");
                    failures.push(EntryFailure {
                        path: entry.full_path().to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(RackError::BatchFailure {
                operation: "purge_idle",
                attempted,
                failures,
            });
        }

        if attempted > 0 {
            tracing::info!(purged = attempted, "Purged idle plugins");
        }
        Ok(attempted)
    }

    /// Check out the first plugin, in discovery order, whose minor type is
    /// `minor_type` (and whose major type matches the rack's filter).
    ///
    /// Loads the entry if needed. Entries whose type is still unknown are
    /// loaded to learn it. An entry that fails to load is passed over and the
    /// scan continues. Returns `None` when nothing matches.
    ///
    /// Every handle returned must be given back with
    /// [`finished_with_plugin`](Self::finished_with_plugin).
    pub fn use_by_type(&self, minor_type: &str) -> Option<PluginHandle> {
        let mut inner = self.lock();
        let RackInner {
            major_type,
            entries,
        } = &mut *inner;
        let major_filter = major_type.as_deref();

        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.plugin_type().is_none() {
                if let Err(e) = self.open_entry(entry) {
                    tracing::warn!(path = %entry.full_path().display(), error = %e, "Cannot load plugin to learn its type");
                    continue;
                }
            }

            if !entry.matches(minor_type, major_filter) {
                continue;
            }

            if !entry.is_loaded() {
                if let Err(e) = self.open_entry(entry) {
                    tracing::warn!(
                        path = %entry.full_path().display(),
                        error = %e,
                        "Failed to load matching plugin, trying next candidate"
                    );
                    continue;
                }
                // The module may have changed on disk since it was probed.
                if !entry.matches(minor_type, major_filter) {
                    continue;
                }
            }

            let Some(plugin) = entry.checkout() else {
                continue;
            };
            tracing::debug!(
                path = %entry.full_path().display(),
                ref_count = entry.ref_count(),
                "Plugin checked out"
            );
            return Some(PluginHandle::new(
                self.id,
                index,
                entry.generation(),
                entry.full_path().to_path_buf(),
                plugin,
            ));
        }

        tracing::debug!(minor_type = %minor_type, major_type = ?major_filter, "No matching plugin");
        None
    }

    /// Give back a handle obtained from [`use_by_type`](Self::use_by_type).
    ///
    /// The plugin stays loaded when its reference count reaches zero; call
    /// [`purge_idle`](Self::purge_idle) to unload it. Fails with
    /// [`RackError::InvalidHandle`] when the handle does not belong to a live
    /// load in this rack, and with [`RackError::RefCountUnderflow`] when the
    /// entry has no outstanding checkouts.
    pub fn finished_with_plugin(&self, handle: &PluginHandle) -> Result<(), RackError> {
        if handle.rack != self.id {
            return Err(RackError::invalid_handle("handle belongs to another rack"));
        }

        let mut inner = self.lock();
        let entry = inner.entries.get_mut(handle.index).ok_or_else(|| {
            RackError::invalid_handle(format!("no entry at index {}", handle.index))
        })?;

        if !entry.is_loaded() || entry.generation() != handle.generation {
            return Err(RackError::invalid_handle(format!(
                "stale handle for {}",
                entry.full_path().display()
            )));
        }

        let remaining = entry.checkin()?;
        tracing::debug!(
            path = %entry.full_path().display(),
            ref_count = remaining,
            "Plugin checked in"
        );
        Ok(())
    }

    /// Write one line per entry (path, type, state, reference count) to
    /// `out`, and log the same at info level.
    pub fn print_all_plugins<W: Write>(&self, out: &mut W) -> Result<(), RackError> {
        for info in self.entries() {
            tracing::info!(
                path = %info.full_path.display(),
                plugin_type = info.plugin_type.as_deref().unwrap_or("<unknown>"),
                state = %info.state,
                ref_count = info.ref_count,
                "plugin"
            );
            writeln!(out, "{info}")?;
        }
        Ok(())
    }

    /// Snapshot of every entry, in discovery order
    pub fn entries(&self) -> Vec<EntryInfo> {
        self.lock().entries.iter().map(PluginEntry::info).collect()
    }

    /// Number of cataloged entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing has been cataloged
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Unload every plugin, checked out or not, and drop the rack.
    ///
    /// Callers must have checked in all handles first. Close errors do not
    /// stop the teardown; they are reported once every entry was processed.
    pub fn destroy(mut self) -> Result<(), RackError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), RackError> {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let entries = std::mem::take(&mut inner.entries);
        let mut attempted = 0;
        let mut failures = Vec::new();

        for mut entry in entries {
            if entry.ref_count() > 0 {
                tracing::warn!(
                    path = %entry.full_path().display(),
                    ref_count = entry.ref_count(),
                    "Destroying rack while plugin is checked out"
                );
            }
            let Some(module) = entry.detach() else {
                continue;
            };
            attempted += 1;
            if let Err(e) = self.loader.close(entry.full_path(), module) {
                failures.push(EntryFailure {
                    path: entry.full_path().to_path_buf(),
                    error: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            if attempted > 0 {
                tracing::debug!(rack = ?self.id, unloaded = attempted, "Plugin rack destroyed");
            }
            Ok(())
        } else {
            Err(RackError::BatchFailure {
                operation: "destroy",
                attempted,
                failures,
            })
        }
    }
}

impl Default for PluginRack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginRack {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "Errors while tearing down plugin rack");
        }
    }
}

impl fmt::Debug for PluginRack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("PluginRack")
            .field("id", &self.id)
            .field("major_type", &inner.major_type)
            .field("entries", &inner.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::error::ErrorKind;
    use crate::plugins::mock::{MockLoader, MockModule};
    use tempfile::TempDir;

    /// Temp plugin directory whose files are registered with a mock loader
    struct Fixture {
        dir: TempDir,
        loader: Arc<MockLoader>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                loader: Arc::new(MockLoader::new()),
            }
        }

        fn path(&self) -> PathBuf {
            self.dir.path().canonicalize().unwrap()
        }

        fn add(&self, name: &str, module: MockModule) -> PathBuf {
            let path = self.path().join(name);
            std::fs::write(&path, b"").unwrap();
            self.loader.register(&path, module);
            path
        }

        fn rack(&self) -> PluginRack {
            PluginRack::with_collaborators(
                self.loader.clone(),
                Arc::new(FsCandidates::with_extensions(["so"])),
            )
        }
    }

    fn state_of(rack: &PluginRack, path: &Path) -> (EntryState, usize) {
        let info = rack
            .entries()
            .into_iter()
            .find(|e| e.full_path == path)
            .unwrap();
        (info.state, info.ref_count)
    }

    #[test]
    fn test_new_rack_is_empty() {
        let rack = PluginRack::new();
        assert!(rack.is_empty());
        assert_eq!(rack.len(), 0);
        assert!(rack.major_type().is_none());
        assert!(rack.use_by_type("anything").is_none());
    }

    #[test]
    fn test_set_major_type_validates() {
        let rack = PluginRack::new();
        rack.set_major_type(Some("auth")).unwrap();
        assert_eq!(rack.major_type().as_deref(), Some("auth"));
        rack.set_major_type(None).unwrap();
        assert!(rack.major_type().is_none());

        let err = rack.set_major_type(Some("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(rack.set_major_type(Some("auth/x")).is_err());
    }

    #[test]
    fn test_read_dir_catalogs_and_filters() {
        let fx = Fixture::new();
        let auth = fx.add("authA.so", MockModule::new("auth/x"));
        fx.add("sched.so", MockModule::new("sched/y"));

        let rack = fx.rack();
        rack.set_major_type(Some("auth")).unwrap();
        assert_eq!(rack.read_dir(fx.path()).unwrap(), 1);

        let entries = rack.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].full_path, auth);
        assert_eq!(entries[0].plugin_type.as_deref(), Some("auth/x"));
        assert_eq!(entries[0].state, EntryState::Discovered);
        assert_eq!(fx.loader.open_count(&auth), 0);
    }

    #[test]
    fn test_read_dir_twice_adds_no_duplicates() {
        let fx = Fixture::new();
        fx.add("auth_a.so", MockModule::new("auth/a"));
        fx.add("auth_b.so", MockModule::new("auth/b"));

        let rack = fx.rack();
        assert_eq!(rack.read_dir(fx.path()).unwrap(), 2);
        assert_eq!(rack.read_dir(fx.path()).unwrap(), 0);
        assert_eq!(rack.read_dir(fx.dir.path().join(".")).unwrap(), 0);
        assert_eq!(rack.len(), 2);
    }

    #[test]
    fn test_read_dir_skips_unprobeable_candidates() {
        let fx = Fixture::new();
        fx.add("auth_bad.so", MockModule::new("auth/bad").failing_probe());
        fx.add("auth_good.so", MockModule::new("auth/good"));
        std::fs::write(fx.path().join("stray.so"), b"").unwrap();

        let rack = fx.rack();
        assert_eq!(rack.read_dir(fx.path()).unwrap(), 1);
        assert_eq!(
            rack.entries()[0].plugin_type.as_deref(),
            Some("auth/good")
        );
    }

    #[test]
    fn test_read_dir_missing_directory() {
        let fx = Fixture::new();
        let rack = fx.rack();
        let err = rack.read_dir(fx.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(
            rack.read_dir("").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_read_dir_search_path() {
        let first = Fixture::new();
        let second = Fixture::new();
        first.add("auth_a.so", MockModule::new("auth/a"));
        second.add("auth_b.so", MockModule::new("auth/b"));
        second
            .loader
            .register(first.path().join("auth_a.so"), MockModule::new("auth/a"));

        let rack = second.rack();
        let search_path = std::env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(rack.read_dir(&search_path).unwrap(), 2);

        let types: Vec<_> = rack
            .entries()
            .into_iter()
            .filter_map(|e| e.plugin_type)
            .collect();
        assert_eq!(types, vec!["auth/a", "auth/b"]);
    }

    #[test]
    fn test_search_path_with_missing_component_still_scans_the_rest() {
        let fx = Fixture::new();
        fx.add("auth_a.so", MockModule::new("auth/a"));

        let rack = fx.rack();
        let search_path = std::env::join_paths([fx.path().join("missing"), fx.path()]).unwrap();
        assert!(rack.read_dir(&search_path).is_err());
        assert_eq!(rack.len(), 1);
    }

    #[test]
    fn test_opaque_modules_use_file_name_when_filtered() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x").opaque());
        fx.add("sched_y.so", MockModule::new("sched/y").opaque());

        let rack = fx.rack();
        rack.set_major_type(Some("auth")).unwrap();
        assert_eq!(rack.read_dir(fx.path()).unwrap(), 1);
        assert_eq!(rack.entries()[0].plugin_type, None);
    }

    #[test]
    fn test_use_by_type_loads_unknown_types_to_match() {
        let fx = Fixture::new();
        let a = fx.add("a.so", MockModule::new("auth/a").opaque());
        let b = fx.add("b.so", MockModule::new("auth/b").opaque());

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();

        let handle = rack.use_by_type("b").unwrap();
        assert_eq!(handle.path(), b);
        // a was loaded to learn its type and stays warm
        assert_eq!(state_of(&rack, &a), (EntryState::LoadedIdle, 0));
        assert_eq!(state_of(&rack, &b), (EntryState::LoadedInUse, 1));
        assert_eq!(rack.entries()[0].plugin_type.as_deref(), Some("auth/a"));
        rack.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_use_by_type_shares_instance_and_counts() {
        let fx = Fixture::new();
        let x = fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();

        let h1 = rack.use_by_type("x").unwrap();
        let h2 = rack.use_by_type("x").unwrap();
        let h3 = rack.use_by_type("x").unwrap();
        assert!(h1.same_instance(&h2));
        assert!(h2.same_instance(&h3));
        assert_eq!(fx.loader.open_count(&x), 1);
        assert_eq!(state_of(&rack, &x), (EntryState::LoadedInUse, 3));

        rack.finished_with_plugin(&h1).unwrap();
        assert_eq!(state_of(&rack, &x), (EntryState::LoadedInUse, 2));
        rack.finished_with_plugin(&h2).unwrap();
        rack.finished_with_plugin(&h3).unwrap();
        assert_eq!(state_of(&rack, &x), (EntryState::LoadedIdle, 0));

        let err = rack.finished_with_plugin(&h3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateError);
        assert_eq!(state_of(&rack, &x), (EntryState::LoadedIdle, 0));
        // check-in never unloads
        assert_eq!(fx.loader.close_count(&x), 0);
    }

    #[test]
    fn test_first_discovered_wins() {
        let fx = Fixture::new();
        let first = fx.add("auth_1.so", MockModule::new("auth/x"));
        fx.add("auth_2.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        let handle = rack.use_by_type("x").unwrap();
        assert_eq!(handle.path(), first);
        rack.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_failed_load_falls_through_to_next_candidate() {
        let fx = Fixture::new();
        let broken = fx.add("auth_1.so", MockModule::new("auth/x").failing_open());
        let good = fx.add("auth_2.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        let handle = rack.use_by_type("x").unwrap();
        assert_eq!(handle.path(), good);
        assert_eq!(state_of(&rack, &broken), (EntryState::Discovered, 0));
        rack.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_no_match_returns_none() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x"));
        fx.add("auth_y.so", MockModule::new("auth/y").failing_open());

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        assert!(rack.use_by_type("missing").is_none());
        assert!(rack.use_by_type("y").is_none());
        assert!(rack.entries().iter().all(|e| e.state == EntryState::Discovered));
    }

    #[test]
    fn test_filter_applies_to_checkout_not_retroactively_to_catalog() {
        let fx = Fixture::new();
        let sched = fx.add("sched_x.so", MockModule::new("sched/x"));
        let auth = fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        rack.set_major_type(Some("sched")).unwrap();
        assert_eq!(rack.len(), 2);

        let handle = rack.use_by_type("x").unwrap();
        assert_eq!(handle.path(), sched);
        assert_eq!(fx.loader.open_count(&auth), 0);
        rack.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_load_all_is_best_effort() {
        let fx = Fixture::new();
        let a = fx.add("auth_a.so", MockModule::new("auth/a"));
        let bad = fx.add("auth_b.so", MockModule::new("auth/b").failing_open());
        let c = fx.add("auth_c.so", MockModule::new("auth/c"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();

        let err = rack.load_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
        match err {
            RackError::BatchFailure {
                attempted,
                failures,
                ..
            } => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, bad);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state_of(&rack, &a), (EntryState::LoadedIdle, 0));
        assert_eq!(state_of(&rack, &bad), (EntryState::Discovered, 0));
        assert_eq!(state_of(&rack, &c), (EntryState::LoadedIdle, 0));

        // already loaded entries are not reopened
        fx.loader.register(&bad, MockModule::new("auth/b"));
        assert_eq!(rack.load_all().unwrap(), 1);
        assert_eq!(fx.loader.open_count(&a), 1);
    }

    #[test]
    fn test_purge_idle_leaves_in_use_entries() {
        let fx = Fixture::new();
        let a = fx.add("auth_a.so", MockModule::new("auth/a"));
        let b = fx.add("auth_b.so", MockModule::new("auth/b"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        rack.load_all().unwrap();
        let held = rack.use_by_type("b").unwrap();

        assert_eq!(rack.purge_idle().unwrap(), 1);
        assert_eq!(state_of(&rack, &a), (EntryState::Discovered, 0));
        assert_eq!(state_of(&rack, &b), (EntryState::LoadedInUse, 1));
        assert_eq!(fx.loader.live_count(&a), 0);
        assert_eq!(fx.loader.live_count(&b), 1);

        rack.finished_with_plugin(&held).unwrap();
        assert_eq!(rack.purge_idle().unwrap(), 1);
        assert_eq!(fx.loader.live_count(&b), 0);
        assert_eq!(rack.purge_idle().unwrap(), 0);
    }

    #[test]
    fn test_purge_reports_close_errors_but_unloads() {
        let fx = Fixture::new();
        let sticky = fx.add("auth_s.so", MockModule::new("auth/s").failing_close());

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        rack.load_all().unwrap();

        let err = rack.purge_idle().unwrap_err();
        assert!(matches!(err, RackError::BatchFailure { operation: "purge_idle", .. }));
        assert_eq!(state_of(&rack, &sticky), (EntryState::Discovered, 0));
    }

    #[test]
    fn test_stale_handle_after_purge_and_reload() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        let old = rack.use_by_type("x").unwrap();
        rack.finished_with_plugin(&old).unwrap();
        rack.purge_idle().unwrap();

        let err = rack.finished_with_plugin(&old).unwrap_err();
        assert!(matches!(err, RackError::InvalidHandle { .. }));

        let fresh = rack.use_by_type("x").unwrap();
        assert!(!fresh.same_instance(&old));
        assert!(matches!(
            rack.finished_with_plugin(&old),
            Err(RackError::InvalidHandle { .. })
        ));
        rack.finished_with_plugin(&fresh).unwrap();
    }

    #[test]
    fn test_handle_from_other_rack_is_rejected() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack_a = fx.rack();
        let rack_b = fx.rack();
        rack_a.read_dir(fx.path()).unwrap();
        rack_b.read_dir(fx.path()).unwrap();

        let handle = rack_a.use_by_type("x").unwrap();
        let err = rack_b.finished_with_plugin(&handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        rack_a.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_print_all_plugins() {
        let fx = Fixture::new();
        let a = fx.add("auth_a.so", MockModule::new("auth/a"));
        fx.add("auth_b.so", MockModule::new("auth/b").opaque());

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        let handle = rack.use_by_type("a").unwrap();

        let mut out = Vec::new();
        rack.print_all_plugins(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            format!("{}  auth/a  in-use  refs=1", a.display())
        );
        assert!(lines[1].ends_with("<unknown>  discovered  refs=0"));
        rack.finished_with_plugin(&handle).unwrap();
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_print_to_failing_sink_is_not_a_load_failure() {
        let fx = Fixture::new();
        fx.add("auth_a.so", MockModule::new("auth/a"));
        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();

        let err = rack.print_all_plugins(&mut ClosedPipe).unwrap_err();
        assert!(matches!(err, RackError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(rack.entries()[0].state, EntryState::Discovered);
    }

    #[test]
    fn test_destroy_unloads_checked_out_plugins() {
        let fx = Fixture::new();
        let x = fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        let _h1 = rack.use_by_type("x").unwrap();
        let _h2 = rack.use_by_type("x").unwrap();

        rack.destroy().unwrap();
        assert_eq!(fx.loader.close_count(&x), 1);
        assert_eq!(fx.loader.live_count(&x), 0);
    }

    #[test]
    fn test_destroy_reports_close_errors_after_closing_everything() {
        let fx = Fixture::new();
        let sticky = fx.add("auth_s.so", MockModule::new("auth/s").failing_close());
        let fine = fx.add("auth_t.so", MockModule::new("auth/t"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        rack.load_all().unwrap();

        let err = rack.destroy().unwrap_err();
        assert!(matches!(err, RackError::BatchFailure { operation: "destroy", .. }));
        assert_eq!(fx.loader.close_count(&sticky), 1);
        assert_eq!(fx.loader.close_count(&fine), 1);
    }

    #[test]
    fn test_drop_unloads_like_destroy() {
        let fx = Fixture::new();
        let x = fx.add("auth_x.so", MockModule::new("auth/x"));
        {
            let rack = fx.rack();
            rack.read_dir(fx.path()).unwrap();
            rack.load_all().unwrap();
            assert_eq!(fx.loader.live_count(&x), 1);
        }
        assert_eq!(fx.loader.live_count(&x), 0);
    }

    #[test]
    fn test_apply_config_skips_missing_dirs() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x"));
        fx.add("sched_y.so", MockModule::new("sched/y"));

        let rack = fx.rack();
        let config = RackConfig {
            plugin_dirs: vec![fx.path().join("missing"), fx.path()],
            major_type: Some("sched".to_string()),
        };
        assert_eq!(rack.apply_config(&config).unwrap(), 1);
        assert_eq!(rack.major_type().as_deref(), Some("sched"));
        assert_eq!(rack.entries()[0].plugin_type.as_deref(), Some("sched/y"));
    }

    #[test]
    fn test_module_retyped_after_discovery_is_not_returned() {
        let fx = Fixture::new();
        let path = fx.add("auth_x.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.set_major_type(Some("auth")).unwrap();
        rack.read_dir(fx.path()).unwrap();
        fx.loader.register(&path, MockModule::new("sched/x"));

        assert!(rack.use_by_type("x").is_none());
        // Loaded under its new type and left for purge to reclaim
        assert_eq!(state_of(&rack, &path), (EntryState::LoadedIdle, 0));
        assert_eq!(rack.entries()[0].plugin_type.as_deref(), Some("sched/x"));
        assert_eq!(rack.purge_idle().unwrap(), 1);
    }

    #[test]
    fn test_module_with_new_minor_type_is_skipped() {
        let fx = Fixture::new();
        let first = fx.add("auth_1.so", MockModule::new("auth/x"));
        let second = fx.add("auth_2.so", MockModule::new("auth/x"));

        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        fx.loader.register(&first, MockModule::new("auth/y"));

        let handle = rack.use_by_type("x").unwrap();
        assert_eq!(handle.path(), second);
        assert_eq!(handle.descriptor().plugin_type.to_string(), "auth/x");
        rack.finished_with_plugin(&handle).unwrap();
    }

    #[test]
    fn test_from_config_scans_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("auth_fake.so"), b"not a library").unwrap();
        let config = RackConfig {
            plugin_dirs: vec![dir.path().join("missing"), dir.path().to_path_buf()],
            major_type: Some("auth".to_string()),
        };

        let rack = PluginRack::from_config(&config).unwrap();
        assert_eq!(rack.major_type().as_deref(), Some("auth"));
        assert!(rack.is_empty());

        let bad = RackConfig {
            plugin_dirs: Vec::new(),
            major_type: Some(String::new()),
        };
        assert!(PluginRack::from_config(&bad).is_err());
    }

    #[test]
    fn test_debug_shows_entry_count() {
        let fx = Fixture::new();
        fx.add("auth_x.so", MockModule::new("auth/x"));
        let rack = fx.rack();
        rack.read_dir(fx.path()).unwrap();
        assert!(format!("{rack:?}").contains("entries: 1"));
    }
}
