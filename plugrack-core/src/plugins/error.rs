//! Plugin rack error types

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of outcome codes every rack error maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad rack, handle or argument
    InvalidArgument,
    /// Directory missing, or nothing matches
    NotFound,
    /// A module could not be probed, opened or closed
    LoadFailure,
    /// Check-in without matching checkout
    StateError,
    /// Allocation failure while growing the catalog
    ResourceExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::LoadFailure => "load failure",
            Self::StateError => "state error",
            Self::ResourceExhausted => "resource exhausted",
        };
        f.write_str(s)
    }
}

/// One failed entry inside a batch operation
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    /// Module path
    pub path: PathBuf,
    /// Rendered error
    pub error: String,
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Errors that can occur in the plugin rack
#[derive(Error, Debug)]
pub enum RackError {
    /// Argument rejected before touching the catalog
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Handle does not belong to a live checkout in this rack
    #[error("Invalid plugin handle: {reason}")]
    InvalidHandle { reason: String },

    /// Plugin directory could not be listed
    #[error("Plugin directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// A module could not be probed, opened or closed
    #[error("Failed to load plugin {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    /// API version mismatch between the rack and the plugin
    #[error("API version mismatch in {path}: rack expects {expected}, plugin has {found}")]
    ApiVersionMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    /// The instance reports a different type than the module exports
    #[error("Plugin {path} exports type {exported} but its instance reports {reported}")]
    TypeMismatch {
        path: PathBuf,
        exported: String,
        reported: String,
    },

    /// Check-in called more often than checkout
    #[error("Plugin {path} checked in more times than it was checked out")]
    RefCountUnderflow { path: PathBuf },

    /// Catalog could not grow
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Some entries of a batch operation failed; the rest were processed
    #[error("{operation}: {} of {attempted} plugins failed ({})", .failures.len(), join_failures(.failures))]
    BatchFailure {
        operation: &'static str,
        attempted: usize,
        failures: Vec<EntryFailure>,
    },

    /// Configuration error (parsing, saving, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_failures(failures: &[EntryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RackError {
    /// Map this error onto the closed outcome set
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::InvalidHandle { .. }
            | Self::Config(_)
            | Self::Io(_) => ErrorKind::InvalidArgument,
            Self::DirectoryNotFound { .. } => ErrorKind::NotFound,
            Self::LoadFailure { .. }
            | Self::ApiVersionMismatch { .. }
            | Self::TypeMismatch { .. }
            | Self::BatchFailure { .. } => ErrorKind::LoadFailure,
            Self::RefCountUnderflow { .. } => ErrorKind::StateError,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
        }
    }

    /// Shorthand for a [`RackError::LoadFailure`]
    pub fn load_failure(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::LoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_handle(reason: impl Into<String>) -> Self {
        Self::InvalidHandle {
            reason: reason.into(),
        }
    }
}
