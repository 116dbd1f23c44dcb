//! In-process loader for tests and embedding
//!
//! [`MockLoader`] stands in for [`DynamicLoader`](super::DynamicLoader): modules
//! are registered by path, and the loader counts opens and closes so tests can
//! assert exactly when the rack loads and unloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use plugrack_plugin_api::{Plugin, PluginDescriptor, PluginError, PluginType};

use super::error::RackError;
use super::loader::PluginLoader;

/// A plugin whose descriptor is fixed at construction
#[derive(Debug)]
pub struct MockPlugin {
    descriptor: PluginDescriptor,
    invocations: AtomicUsize,
}

impl MockPlugin {
    /// Build a plugin of type `major/minor`. A string without `/` is used as
    /// the major type with minor type `default`.
    pub fn new(plugin_type: &str) -> Self {
        let plugin_type = PluginType::parse(plugin_type)
            .unwrap_or_else(|_| PluginType::new(plugin_type, "default"));
        Self {
            descriptor: PluginDescriptor::new(plugin_type.file_stem(), plugin_type, "0.1.0"),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Number of successful [`Plugin::invoke`] calls
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Plugin for MockPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        self.descriptor.clone()
    }

    fn on_load(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_unload(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string(), "invocations".to_string()]
    }

    fn invoke(
        &self,
        capability: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, PluginError> {
        let result = match capability {
            "echo" => input.clone(),
            "invocations" => serde_json::json!(self.invocations()),
            other => return Err(PluginError::unknown_capability(other)),
        };
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// How a registered module behaves
#[derive(Debug, Clone)]
pub struct MockModule {
    plugin_type: String,
    probe_supported: bool,
    fail_probe: bool,
    fail_open: bool,
    fail_close: bool,
    open_delay: Option<Duration>,
}

impl MockModule {
    /// A well-behaved module of type `major/minor`
    pub fn new(plugin_type: &str) -> Self {
        Self {
            plugin_type: plugin_type.to_string(),
            probe_supported: true,
            fail_probe: false,
            fail_open: false,
            fail_close: false,
            open_delay: None,
        }
    }

    /// Probe reports "unsupported"; the type is only known after a load
    pub fn opaque(mut self) -> Self {
        self.probe_supported = false;
        self
    }

    /// Probe returns an error
    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Open returns an error
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Close returns an error (after releasing the instance)
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Open sleeps before returning, to widen race windows in tests
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    opens: usize,
    closes: usize,
}

/// Loader backed by an in-memory table of modules
#[derive(Debug, Default)]
pub struct MockLoader {
    modules: Mutex<HashMap<PathBuf, MockModule>>,
    counters: Mutex<HashMap<PathBuf, Counters>>,
}

impl MockLoader {
    /// Empty loader; every path is "not a plugin" until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the module at `path`
    pub fn register(&self, path: impl Into<PathBuf>, module: MockModule) -> &Self {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), module);
        self
    }

    /// Times `path` was opened successfully
    pub fn open_count(&self, path: &Path) -> usize {
        self.counters(path).opens
    }

    /// Times `path` was closed
    pub fn close_count(&self, path: &Path) -> usize {
        self.counters(path).closes
    }

    /// Opens minus closes, never below zero
    pub fn live_count(&self, path: &Path) -> usize {
        let c = self.counters(path);
        c.opens.saturating_sub(c.closes)
    }

    fn counters(&self, path: &Path) -> Counters {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    fn bump(&self, path: &Path, f: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(counters.entry(path.to_path_buf()).or_default());
    }

    fn module(&self, path: &Path) -> Result<MockModule, RackError> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| RackError::load_failure(path, "not a plugin module"))
    }
}

impl PluginLoader for MockLoader {
    fn probe(&self, path: &Path) -> Result<Option<PluginDescriptor>, RackError> {
        let module = self.module(path)?;
        if module.fail_probe {
            return Err(RackError::load_failure(path, "probe failed"));
        }
        if !module.probe_supported {
            return Ok(None);
        }
        Ok(Some(MockPlugin::new(&module.plugin_type).descriptor()))
    }

    fn open(&self, path: &Path) -> Result<Arc<dyn Plugin>, RackError> {
        let module = self.module(path)?;
        if let Some(delay) = module.open_delay {
            std::thread::sleep(delay);
        }
        if module.fail_open {
            return Err(RackError::load_failure(path, "open failed"));
        }
        self.bump(path, |c| c.opens += 1);
        Ok(Arc::new(MockPlugin::new(&module.plugin_type)))
    }

    fn close(&self, path: &Path, plugin: Arc<dyn Plugin>) -> Result<(), RackError> {
        drop(plugin);
        self.bump(path, |c| c.closes += 1);
        match self.module(path) {
            Ok(module) if module.fail_close => Err(RackError::load_failure(path, "close failed")),
            _ => Ok(()),
        }
    }
}
