use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where modules live and how they are recognized.
///
/// Relative directories are resolved against `project_root`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub project_root: PathBuf,
    /// Installed third-party modules.
    pub dependencies_dir: PathBuf,
    /// Name prefix marking an installed entry as a module.
    pub module_prefix: String,
    /// Namespace folders (e.g. `@mountkit`) scanned for prefixed sub-entries.
    pub namespaces: Vec<String>,
    /// Compiled-output subfolder preferred over the module root when present.
    pub compiled_dir: String,
    /// Project-local modules; also hosts override roots of installed modules.
    pub local_modules_dir: PathBuf,
    /// The project's own source tree, walked last.
    pub source_dir: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            dependencies_dir: PathBuf::from("deps"),
            module_prefix: "mountkit-".to_string(),
            namespaces: vec!["@mountkit".to_string()],
            compiled_dir: "dist".to_string(),
            local_modules_dir: PathBuf::from("modules"),
            source_dir: PathBuf::from("src"),
        }
    }
}

impl DiscoveryConfig {
    /// Defaults rooted at `project_root`.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_root.join(dir)
        }
    }

    pub fn dependencies_path(&self) -> PathBuf {
        self.resolve(&self.dependencies_dir)
    }

    pub fn local_modules_path(&self) -> PathBuf {
        self.resolve(&self.local_modules_dir)
    }

    pub fn source_path(&self) -> PathBuf {
        self.resolve(&self.source_dir)
    }
}
