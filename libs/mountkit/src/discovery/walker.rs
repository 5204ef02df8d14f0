//! Recursive, deterministic directory walker.

use std::io;
use std::path::{Path, PathBuf};

use crate::discovery::classify::{classify_entry, EntryKind, FileClassification};
use crate::discovery::overrides::OverrideResolver;
use crate::error::ScanError;
use crate::fs::FileSystem;

/// A classified, override-resolved unit found by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
    pub classification: FileClassification,
    /// Physical path actually used (the override when one exists).
    pub resolved_path: PathBuf,
    pub module_name: String,
}

/// Result of walking one tree.
#[derive(Debug, Default)]
pub struct Walk {
    pub units: Vec<DiscoveredUnit>,
    pub scan_errors: Vec<ScanError>,
}

pub struct Walker<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> Walker<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Walk `root` depth-first, resolving entries against `override_root`.
    ///
    /// Entries are visited in name order. Within a directory, middleware files
    /// come first, then route files, then everything else; subdirectories are
    /// walked after all files of their parent.
    pub fn walk(&self, module: &str, root: &Path, override_root: Option<&Path>) -> Walk {
        let mut walk = Walk::default();
        self.walk_dir(module, root, override_root, &mut walk);
        tracing::debug!(
            module,
            root = %root.display(),
            units = walk.units.len(),
            "Walked module tree"
        );
        walk
    }

    fn walk_dir(&self, module: &str, dir: &Path, override_dir: Option<&Path>, out: &mut Walk) {
        let mut entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(module, dir = %dir.display(), "Directory not found; skipping");
                return;
            }
            Err(e) => {
                let err = ScanError {
                    path: dir.to_path_buf(),
                    source: e,
                };
                tracing::warn!(
                    module,
                    dir = %dir.display(),
                    error = %err.source,
                    "Failed to scan directory; treating as empty"
                );
                out.scan_errors.push(err);
                return;
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let parent = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let resolver = OverrideResolver::new(self.fs);

        let mut middlewares = Vec::new();
        let mut routes = Vec::new();
        let mut others = Vec::new();
        let mut subdirs = Vec::new();

        for entry in &entries {
            let resolved = resolver.resolve(entry, override_dir);
            match classify_entry(&entry.name, &parent, resolved.is_dir) {
                EntryKind::Descend => subdirs.push((resolved.path, resolved.child_override)),
                EntryKind::Unit(FileClassification::Ignored) => {
                    tracing::trace!(path = %resolved.path.display(), "Ignoring unrecognized file");
                }
                EntryKind::Unit(classification) => {
                    let unit = DiscoveredUnit {
                        classification,
                        resolved_path: resolved.path,
                        module_name: module.to_string(),
                    };
                    match classification {
                        FileClassification::Middleware => middlewares.push(unit),
                        FileClassification::Route => routes.push(unit),
                        _ => others.push(unit),
                    }
                }
            }
        }

        out.units.extend(middlewares);
        out.units.extend(routes);
        out.units.extend(others);

        for (subdir, child_override) in subdirs {
            self.walk_dir(module, &subdir, child_override.as_deref(), out);
        }
    }
}
