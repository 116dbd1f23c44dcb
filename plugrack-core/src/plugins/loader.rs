//! Loader collaborator: probe, open and close plugin modules

use libloading::{Library, Symbol};
use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plugrack_plugin_api::{
    API_VERSION, Plugin, PluginDescriptor, PluginError, PluginType, symbols,
};

use super::error::RackError;

/// Opens and closes plugin modules on behalf of a rack.
///
/// The rack calls these while holding its catalog lock, so an
/// implementation never sees two concurrent opens of the same path.
pub trait PluginLoader: Send + Sync {
    /// Read a module's descriptor without constructing the plugin.
    ///
    /// Returns `Ok(None)` when this loader cannot tell a module's type
    /// without a full load; the rack then learns the type on first use.
    fn probe(&self, path: &Path) -> Result<Option<PluginDescriptor>, RackError>;

    /// Load a module and return its initialised instance
    fn open(&self, path: &Path) -> Result<Arc<dyn Plugin>, RackError>;

    /// Release the rack's reference to a loaded instance
    fn close(&self, path: &Path, plugin: Arc<dyn Plugin>) -> Result<(), RackError>;
}

/// Loads plugins from shared libraries (.so / .dylib / .dll) built with
/// `plugrack_plugin_api::export_plugin!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl DynamicLoader {
    /// Creates a new dynamic loader.
    pub fn new() -> Self {
        Self
    }

    /// Open the library and read the descriptor it exports.
    fn open_library(path: &Path) -> Result<(Library, PluginDescriptor), RackError> {
        // SAFETY: Loading a library runs its initialisers. Only directories
        // the host was configured with are scanned, and those are trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| RackError::load_failure(path, e))?;

        // SAFETY: The symbol is generated by export_plugin! with this signature.
        let api_version_fn: Symbol<extern "C" fn() -> u32> =
            unsafe { library.get(symbols::API_VERSION) }
                .map_err(|e| RackError::load_failure(path, e))?;

        let found = api_version_fn();
        if found != API_VERSION {
            return Err(RackError::ApiVersionMismatch {
                path: path.to_path_buf(),
                expected: API_VERSION,
                found,
            });
        }

        let plugin_type = PluginType::parse(&exported_str(&library, path, symbols::PLUGIN_TYPE)?)
            .map_err(|e| RackError::load_failure(path, e))?;

        let descriptor = PluginDescriptor {
            name: exported_str(&library, path, symbols::NAME)?,
            plugin_type,
            version: exported_str(&library, path, symbols::VERSION)?,
            api_version: found,
        };

        Ok((library, descriptor))
    }
}

/// Read one of the static C strings export_plugin! generates
fn exported_str(library: &Library, path: &Path, symbol: &[u8]) -> Result<String, RackError> {
    // SAFETY: The symbol is generated by export_plugin! with this signature.
    let string_fn: Symbol<extern "C" fn() -> *const c_char> =
        unsafe { library.get(symbol) }.map_err(|e| RackError::load_failure(path, e))?;

    let ptr = string_fn();
    if ptr.is_null() {
        return Err(RackError::load_failure(
            path,
            format!("{} returned null", String::from_utf8_lossy(symbol)),
        ));
    }

    // SAFETY: Non-null pointers from export_plugin! point at NUL-terminated
    // static strings that live as long as the library.
    let value = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| RackError::load_failure(path, e))?;
    Ok(value.to_string())
}

impl PluginLoader for DynamicLoader {
    fn probe(&self, path: &Path) -> Result<Option<PluginDescriptor>, RackError> {
        // The library is unloaded again when it goes out of scope.
        let (_library, descriptor) = Self::open_library(path)?;
        tracing::debug!(
            path = %path.display(),
            plugin_type = %descriptor.plugin_type,
            "Probed plugin"
        );
        Ok(Some(descriptor))
    }

    fn open(&self, path: &Path) -> Result<Arc<dyn Plugin>, RackError> {
        let (library, exported) = Self::open_library(path)?;

        // SAFETY: The create function returns a raw pointer from
        // Box::into_raw that we convert back to a Box<dyn Plugin>.
        let create_fn: Symbol<extern "C" fn() -> *mut dyn Plugin> =
            unsafe { library.get(symbols::CREATE) }.map_err(|e| RackError::load_failure(path, e))?;

        let raw = create_fn();
        if raw.is_null() {
            return Err(RackError::load_failure(path, "plugin constructor returned null"));
        }
        let mut instance = unsafe { Box::from_raw(raw) };

        let reported = instance.descriptor().plugin_type;
        if reported != exported.plugin_type {
            return Err(RackError::TypeMismatch {
                path: path.to_path_buf(),
                exported: exported.plugin_type.to_string(),
                reported: reported.to_string(),
            });
        }

        // Panic isolation: a plugin that panics while initialising is a
        // load failure, not a host crash.
        match std::panic::catch_unwind(AssertUnwindSafe(|| instance.on_load())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(RackError::load_failure(path, format!("on_load failed: {e}")));
            }
            Err(_) => {
                return Err(RackError::load_failure(path, "plugin panicked in on_load"));
            }
        }

        tracing::debug!(
            path = %path.display(),
            name = %exported.name,
            version = %exported.version,
            "Dynamic plugin opened"
        );

        Ok(Arc::new(DynamicPlugin {
            instance,
            path: path.to_path_buf(),
            _library: library,
        }))
    }

    fn close(&self, path: &Path, plugin: Arc<dyn Plugin>) -> Result<(), RackError> {
        let outstanding = Arc::strong_count(&plugin) - 1;
        if outstanding > 0 {
            tracing::warn!(
                path = %path.display(),
                outstanding,
                "Plugin still referenced by handles; unload deferred until they are dropped"
            );
        }
        drop(plugin);
        Ok(())
    }
}

/// A plugin instance together with the library that holds its code.
///
/// Field order matters: `instance` is dropped before `_library`, so the
/// instance's destructor still has its code mapped.
struct DynamicPlugin {
    instance: Box<dyn Plugin>,
    path: PathBuf,
    _library: Library,
}

impl Drop for DynamicPlugin {
    fn drop(&mut self) {
        // Call on_unload before the library is dropped
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.instance.on_unload()));
        match result {
            Ok(Ok(())) => {
                tracing::debug!(path = %self.path.display(), "Dynamic plugin unloaded");
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Plugin on_unload returned error"
                );
            }
            Err(_) => {
                tracing::error!(path = %self.path.display(), "Plugin panicked in on_unload");
            }
        }
    }
}

impl Plugin for DynamicPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        self.instance.descriptor()
    }

    fn on_load(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_unload(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        self.instance.capabilities()
    }

    fn provides(&self, capability: &str) -> bool {
        self.instance.provides(capability)
    }

    fn invoke(
        &self,
        capability: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, PluginError> {
        self.instance.invoke(capability, input)
    }
}

impl fmt::Debug for DynamicPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPlugin")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
