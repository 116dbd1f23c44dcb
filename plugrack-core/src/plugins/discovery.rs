//! Candidate discovery: which files in a plugin directory are worth probing

use std::path::{Path, PathBuf};

use super::error::RackError;

/// File extensions recognized as plugin shared libraries.
#[cfg(target_os = "macos")]
pub const PLUGIN_EXTENSIONS: &[&str] = &["dylib", "so"];

#[cfg(target_os = "windows")]
pub const PLUGIN_EXTENSIONS: &[&str] = &["dll"];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const PLUGIN_EXTENSIONS: &[&str] = &["so"];

/// Lists candidate module files in a directory
pub trait CandidateSource: Send + Sync {
    /// Candidate files in `dir`, in the order they should be cataloged
    fn list_candidate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, RackError>;
}

/// Lists regular files (or symlinks to them) carrying a plugin extension.
///
/// Paths are canonicalized so the same module reached through two spellings
/// of a directory is cataloged once, and sorted by file name so
/// first-match selection does not depend on the file system's order.
#[derive(Debug, Clone)]
pub struct FsCandidates {
    extensions: Vec<String>,
}

impl FsCandidates {
    /// Candidates with the platform's shared-library extensions
    pub fn new() -> Self {
        Self::with_extensions(PLUGIN_EXTENSIONS.iter().copied())
    }

    /// Candidates with a custom set of extensions (without the dot)
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    fn has_plugin_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

impl Default for FsCandidates {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSource for FsCandidates {
    fn list_candidate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, RackError> {
        let not_found = |e: std::io::Error| {
            tracing::debug!(dir = %dir.display(), error = %e, "Cannot list plugin directory");
            RackError::DirectoryNotFound {
                path: dir.to_path_buf(),
            }
        };

        let dir = dir.canonicalize().map_err(not_found)?;
        let mut found = Vec::new();

        for entry in std::fs::read_dir(&dir).map_err(not_found)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && self.has_plugin_extension(&path) {
                found.push(path);
            }
        }

        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }
}

/// Whether a file name follows the `<major>_<minor>` convention for `major`.
///
/// A leading `lib` is ignored, so both `auth_munge.so` and
/// `libauth_munge.so` belong to major type `auth`.
pub fn name_matches_major(path: &Path, major: &str) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let prefix = format!("{}_", major.replace('/', "_"));
    stem.starts_with(&prefix)
        || stem
            .strip_prefix("lib")
            .is_some_and(|rest| rest.starts_with(&prefix))
}
