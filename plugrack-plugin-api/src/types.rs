//! Plugin types and descriptor structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PluginError;

/// Two-level plugin type, written `major/minor` (e.g. `auth/munge`).
///
/// The major type is the coarse family a rack may be restricted to; the
/// minor type is what callers ask for when checking a plugin out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginType {
    /// Family the plugin belongs to
    pub major: String,
    /// Implementation selector within the family
    pub minor: String,
}

impl PluginType {
    /// Build a type from its two halves
    pub fn new(major: impl Into<String>, minor: impl Into<String>) -> Self {
        Self {
            major: major.into(),
            minor: minor.into(),
        }
    }

    /// Parse the `major/minor` textual form.
    ///
    /// Both halves must be non-empty. Only the first `/` separates them, so
    /// `select/cons/tres` parses as major `select`, minor `cons/tres`.
    pub fn parse(full_type: &str) -> Result<Self, PluginError> {
        let (major, minor) = full_type
            .split_once('/')
            .ok_or_else(|| PluginError::InvalidType(full_type.to_string()))?;

        if major.is_empty() || minor.is_empty() {
            return Err(PluginError::InvalidType(full_type.to_string()));
        }

        Ok(Self::new(major, minor))
    }

    /// File-name stem this type is conventionally shipped under (`auth_munge`)
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.major, self.minor.replace('/', "_"))
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.major, self.minor)
    }
}

impl FromStr for PluginType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PluginType {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PluginType> for String {
    fn from(value: PluginType) -> Self {
        value.to_string()
    }
}

/// Descriptor a plugin module reports about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin name (usually the crate name)
    pub name: String,
    /// Major/minor type the plugin implements
    pub plugin_type: PluginType,
    /// Plugin version (semver)
    pub version: String,
    /// API version this plugin was built against
    pub api_version: u32,
}

impl PluginDescriptor {
    /// Create a descriptor against the current [`crate::API_VERSION`]
    pub fn new(name: impl Into<String>, plugin_type: PluginType, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type,
            version: version.into(),
            api_version: crate::API_VERSION,
        }
    }

    /// Shorthand for `plugin_type.major`
    pub fn major_type(&self) -> &str {
        &self.plugin_type.major
    }

    /// Shorthand for `plugin_type.minor`
    pub fn minor_type(&self) -> &str {
        &self.plugin_type.minor
    }
}
