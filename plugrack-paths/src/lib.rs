//! XDG Base Directory paths for plugrack.
//!
//! Hosts and the CLI should use XDG paths for cross-platform consistency,
//! not platform-native paths.

use std::path::PathBuf;

/// Get the plugrack config directory.
///
/// Returns `$XDG_CONFIG_HOME/plugrack` if set, otherwise `~/.config/plugrack`.
/// This is where the rack configuration and the default plugin directory live.
///
/// # Examples
///
/// ```
/// use plugrack_paths::config_dir;
///
/// let config = config_dir();
/// let rack_file = config.join("rack.toml");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("plugrack")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/plugrack")
    } else {
        PathBuf::from(".config/plugrack")
    }
}

/// Default directory scanned for plugin modules (`<config_dir>/plugins`)
pub fn plugin_dir() -> PathBuf {
    config_dir().join("plugins")
}

/// Default location of the rack configuration file (`<config_dir>/rack.toml`)
pub fn config_file() -> PathBuf {
    config_dir().join("rack.toml")
}
