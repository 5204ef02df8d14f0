//! Local override resolution.
//!
//! A consuming project patches a third-party module by placing an entry with
//! the same relative path under the module's override root. Resolution runs
//! at every directory level, so an override directory replaces the whole
//! subtree below it.

use std::path::{Path, PathBuf};

use crate::fs::{DirEntry, FileSystem};

/// Physical location chosen for a logical directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub is_dir: bool,
    /// `true` when the path comes from the override root.
    pub overridden: bool,
    /// Override root to use for this entry's children.
    pub child_override: Option<PathBuf>,
}

pub struct OverrideResolver<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> OverrideResolver<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Resolve `entry` (listed from the base tree) against `override_dir`,
    /// the override directory parallel to the entry's parent.
    pub fn resolve(&self, entry: &DirEntry, override_dir: Option<&Path>) -> Resolved {
        if let Some(candidate) = override_dir.map(|dir| dir.join(&entry.name)) {
            if self.fs.exists(&candidate) {
                let is_dir = self.fs.is_dir(&candidate);
                tracing::debug!(
                    base = %entry.path.display(),
                    local = %candidate.display(),
                    "Using local override"
                );
                // Inside a redirected subtree every entry already is the override.
                return Resolved {
                    path: candidate,
                    is_dir,
                    overridden: true,
                    child_override: None,
                };
            }
            return Resolved {
                path: entry.path.clone(),
                is_dir: entry.is_dir,
                overridden: false,
                child_override: Some(candidate),
            };
        }

        Resolved {
            path: entry.path.clone(),
            is_dir: entry.is_dir,
            overridden: false,
            child_override: None,
        }
    }
}
