//! Module registry: finds installed and project-local modules.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::discovery::config::DiscoveryConfig;
use crate::error::ScanError;
use crate::fs::{DirEntry, FileSystem};

/// Name under which the project's own source tree is walked.
pub const PROJECT_TREE: &str = "<project>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSource {
    Installed,
    Local,
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Installed => f.write_str("installed"),
            ModuleSource::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Unique; namespaced modules are named `@ns/name`.
    pub name: String,
    pub content_root: PathBuf,
    /// Installed modules are patched from here; local modules have none.
    pub local_override_root: Option<PathBuf>,
    pub source: ModuleSource,
}

/// One tree to walk, in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkSource {
    pub name: String,
    pub root: PathBuf,
    pub override_root: Option<PathBuf>,
}

/// The ordered set of modules for one discovery pass.
#[derive(Debug)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDescriptor>, // installed, then local; each sorted by name
    project_tree: PathBuf,
    scan_errors: Vec<ScanError>,
}

impl ModuleRegistry {
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn get_module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn project_tree(&self) -> &Path {
        &self.project_tree
    }

    /// Module directories that exist but could not be listed.
    pub fn scan_errors(&self) -> &[ScanError] {
        &self.scan_errors
    }

    pub fn take_scan_errors(&mut self) -> Vec<ScanError> {
        std::mem::take(&mut self.scan_errors)
    }

    /// Every tree to walk: modules in registry order, then the project tree.
    pub fn walk_sources(&self) -> Vec<WalkSource> {
        self.modules
            .iter()
            .map(|m| WalkSource {
                name: m.name.clone(),
                root: m.content_root.clone(),
                override_root: m.local_override_root.clone(),
            })
            .chain(std::iter::once(WalkSource {
                name: PROJECT_TREE.to_string(),
                root: self.project_tree.clone(),
                override_root: None,
            }))
            .collect()
    }

    /// Scan the dependency and local module directories.
    ///
    /// Unreadable directories are logged and contribute no modules.
    pub fn discover(fs: &dyn FileSystem, cfg: &DiscoveryConfig) -> Self {
        let mut scanner = Scanner {
            fs,
            cfg,
            errors: Vec::new(),
        };

        let mut installed = scanner.scan_installed();
        installed.sort_by(|a, b| a.name.cmp(&b.name));

        let installed_names: HashSet<String> = installed.iter().map(|m| m.name.clone()).collect();
        let mut local = scanner.scan_local(&installed_names);
        local.sort_by(|a, b| a.name.cmp(&b.name));

        let mut modules = installed;
        modules.extend(local);

        tracing::info!(
            modules = ?modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "Module discovery order resolved"
        );

        Self {
            modules,
            project_tree: cfg.source_path(),
            scan_errors: scanner.errors,
        }
    }
}

struct Scanner<'a> {
    fs: &'a dyn FileSystem,
    cfg: &'a DiscoveryConfig,
    errors: Vec<ScanError>,
}

impl Scanner<'_> {
    /// Sorted sub-directories of `dir`; a missing or unreadable directory is empty.
    fn subdirs(&mut self, dir: &Path) -> Vec<DirEntry> {
        match self.fs.read_dir(dir) {
            Ok(mut entries) => {
                entries.retain(|e| e.is_dir);
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                entries
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "Module directory not found");
                Vec::new()
            }
            Err(source) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %source,
                    "Failed to scan module directory; treating as empty"
                );
                self.errors.push(ScanError {
                    path: dir.to_path_buf(),
                    source,
                });
                Vec::new()
            }
        }
    }

    fn has_prefix(&self, name: &str) -> bool {
        name.len() > self.cfg.module_prefix.len() && name.starts_with(&self.cfg.module_prefix)
    }

    fn content_root(&self, module_dir: &Path) -> PathBuf {
        let compiled = module_dir.join(&self.cfg.compiled_dir);
        if !self.cfg.compiled_dir.is_empty() && self.fs.is_dir(&compiled) {
            compiled
        } else {
            module_dir.to_path_buf()
        }
    }

    fn installed(&self, name: String, dir: &Path) -> ModuleDescriptor {
        ModuleDescriptor {
            local_override_root: Some(self.cfg.local_modules_path().join(&name)),
            content_root: self.content_root(dir),
            name,
            source: ModuleSource::Installed,
        }
    }

    fn scan_installed(&mut self) -> Vec<ModuleDescriptor> {
        let root = self.cfg.dependencies_path();
        let mut found = Vec::new();

        for entry in self.subdirs(&root) {
            if self.has_prefix(&entry.name) {
                found.push(self.installed(entry.name.clone(), &entry.path));
            } else if self.cfg.namespaces.iter().any(|ns| *ns == entry.name) {
                for sub in self.subdirs(&entry.path) {
                    if self.has_prefix(&sub.name) {
                        let name = format!("{}/{}", entry.name, sub.name);
                        found.push(self.installed(name, &sub.path));
                    }
                }
            }
        }

        found
    }

    /// Local modules need no prefix. Entries that are override roots of an
    /// installed module are patches, not modules.
    fn scan_local(&mut self, installed: &HashSet<String>) -> Vec<ModuleDescriptor> {
        let root = self.cfg.local_modules_path();
        let mut candidates = Vec::new();

        for entry in self.subdirs(&root) {
            let is_namespace =
                entry.name.starts_with('@') || self.cfg.namespaces.iter().any(|ns| *ns == entry.name);
            if is_namespace {
                for sub in self.subdirs(&entry.path) {
                    candidates.push((format!("{}/{}", entry.name, sub.name), sub.path));
                }
            } else {
                candidates.push((entry.name, entry.path));
            }
        }

        candidates
            .into_iter()
            .filter(|(name, _)| {
                let is_override = installed.contains(name);
                if is_override {
                    tracing::debug!(module = %name, "Local override root; not a module");
                }
                !is_override
            })
            .map(|(name, dir)| ModuleDescriptor {
                content_root: self.content_root(&dir),
                local_override_root: None,
                name,
                source: ModuleSource::Local,
            })
            .collect()
    }
}
