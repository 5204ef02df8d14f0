//! Version table: base path to the route file of each version.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::discovery::{split_role_stem, DiscoveredUnit, FileClassification};
use crate::routes::version::{split_version, Version};

/// A route file registered under `(base_path, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRegistration {
    pub base_path: String,
    pub version: Version,
    pub file_path: PathBuf,
    pub module_name: String,
}

impl RouteRegistration {
    /// Derive the registration from a route file name; `None` for non-route units.
    pub fn from_unit(unit: &DiscoveredUnit) -> Option<Self> {
        if unit.classification != FileClassification::Route {
            return None;
        }
        let stem = split_role_stem(&unit.resolved_path, FileClassification::Route)?;
        let (base_path, version) = split_version(stem);
        Some(Self {
            base_path,
            version,
            file_path: unit.resolved_path.clone(),
            module_name: unit.module_name.clone(),
        })
    }
}

/// Every version of one base path, in mount order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGroup {
    pub base_path: String,
    pub versions: Vec<RouteRegistration>,
}

/// Accumulated during the content phase; mounted once it is complete.
///
/// At most one file per `(base_path, version)`: a later registration replaces
/// an earlier one.
#[derive(Debug, Default, Clone)]
pub struct VersionTable {
    entries: BTreeMap<String, HashMap<Version, RouteRegistration>>,
}

impl VersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reg: RouteRegistration) {
        let versions = self.entries.entry(reg.base_path.clone()).or_default();
        if let Some(previous) = versions.get(&reg.version) {
            tracing::warn!(
                base_path = %reg.base_path,
                version = %reg.version,
                replaced = %previous.file_path.display(),
                by = %reg.file_path.display(),
                "Route version registered twice; the later file wins"
            );
        }
        tracing::debug!(
            base_path = %reg.base_path,
            version = %reg.version,
            path = %reg.file_path.display(),
            "Registered route file"
        );
        versions.insert(reg.version.clone(), reg);
    }

    /// Register a discovered route unit. Returns `false` for other units.
    pub fn insert_unit(&mut self, unit: &DiscoveredUnit) -> bool {
        match RouteRegistration::from_unit(unit) {
            Some(reg) => {
                self.insert(reg);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, base_path: &str, version: &Version) -> Option<&Path> {
        self.entries
            .get(base_path)?
            .get(version)
            .map(|r| r.file_path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// Base paths in sorted order, each with its versions sorted for mounting.
    pub fn groups(&self) -> Vec<VersionGroup> {
        self.entries
            .iter()
            .map(|(base_path, versions)| {
                let mut versions: Vec<_> = versions.values().cloned().collect();
                versions.sort_by(|a, b| a.version.cmp(&b.version));
                VersionGroup {
                    base_path: base_path.clone(),
                    versions,
                }
            })
            .collect()
    }
}
