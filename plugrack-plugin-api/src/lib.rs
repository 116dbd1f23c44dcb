//! plugrack-plugin-api - Plugin API for plugrack capability modules
//!
//! This crate provides the traits and types needed to write plugins that a
//! plugrack host can discover, load and check out by type. Plugins are native
//! Rust dynamic libraries exporting a small C ABI surface generated by
//! [`export_plugin!`].
//!
//! # Example
//!
//! ```ignore
//! use plugrack_plugin_api::{
//!     Plugin, PluginDescriptor, PluginError, PluginType, export_plugin,
//! };
//!
//! #[derive(Default)]
//! pub struct MungeAuth;
//!
//! impl Plugin for MungeAuth {
//!     fn descriptor(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("auth-munge", PluginType::new("auth", "munge"), "0.1.0")
//!     }
//!
//!     fn on_load(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//!
//!     fn on_unload(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! export_plugin!(MungeAuth, "auth/munge");
//! ```

pub mod error;
pub mod types;

pub use error::PluginError;
pub use types::{PluginDescriptor, PluginType};

/// Current plugin API version. Plugins must match this exactly.
/// This is checked both when probing and when loading plugins.
pub const API_VERSION: u32 = 1;

/// Names of the entry points generated by [`export_plugin!`]
pub mod symbols {
    /// `extern "C" fn() -> u32`
    pub const API_VERSION: &[u8] = b"_plugrack_plugin_api_version";
    /// `extern "C" fn() -> *const c_char`, the `major/minor` type
    pub const PLUGIN_TYPE: &[u8] = b"_plugrack_plugin_type";
    /// `extern "C" fn() -> *const c_char`
    pub const NAME: &[u8] = b"_plugrack_plugin_name";
    /// `extern "C" fn() -> *const c_char`
    pub const VERSION: &[u8] = b"_plugrack_plugin_version";
    /// `extern "C" fn() -> *mut dyn Plugin`
    pub const CREATE: &[u8] = b"_plugrack_plugin_create";
}

/// The core plugin trait - implement this to create a plugrack plugin.
///
/// After a host checks a plugin out it reaches the plugin's functionality
/// through [`Plugin::capabilities`] and [`Plugin::invoke`]. Both have
/// defaults, so a plugin that only needs lifecycle hooks stays small.
pub trait Plugin: Send + Sync {
    /// Return plugin metadata
    fn descriptor(&self) -> PluginDescriptor;

    /// Called once after the module is loaded, before any caller sees it.
    fn on_load(&mut self) -> Result<(), PluginError>;

    /// Called when the module is about to be unloaded. Use this to clean up resources.
    fn on_unload(&mut self) -> Result<(), PluginError>;

    /// Names of the capabilities [`Plugin::invoke`] accepts
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `capability` is one of [`Plugin::capabilities`]
    fn provides(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c == capability)
    }

    /// Invoke a capability with a JSON input.
    ///
    /// Called concurrently by every caller holding a checkout, so plugins
    /// with mutable state need interior mutability.
    fn invoke(
        &self,
        capability: &str,
        _input: &serde_json::Value,
    ) -> Result<serde_json::Value, PluginError> {
        Err(PluginError::unknown_capability(capability))
    }
}

/// Export a plugin type for dynamic loading.
///
/// This macro generates the C ABI entry points that plugrack uses to probe,
/// load and unload plugins dynamically. The second argument is the
/// `major/minor` type; it is exported as a static string so a host can read
/// it without constructing the plugin.
///
/// # Usage
///
/// ```ignore
/// plugrack_plugin_api::export_plugin!(MyPlugin, "auth/munge");
/// ```
///
/// # Generated Functions
///
/// - `_plugrack_plugin_api_version()`: Returns the API version
/// - `_plugrack_plugin_type()`: Returns the `major/minor` type
/// - `_plugrack_plugin_name()` / `_plugrack_plugin_version()`: Crate name and version
/// - `_plugrack_plugin_create()`: Creates a new plugin instance, owned by the host
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty, $full_type:literal) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _plugrack_plugin_create() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::default());
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _plugrack_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _plugrack_plugin_type() -> *const ::std::os::raw::c_char {
            concat!($full_type, "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _plugrack_plugin_name() -> *const ::std::os::raw::c_char {
            concat!(env!("CARGO_PKG_NAME"), "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _plugrack_plugin_version() -> *const ::std::os::raw::c_char {
            concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
        }
    };
}
