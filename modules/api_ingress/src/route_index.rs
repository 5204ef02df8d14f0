//! JSON index of mounted route versions.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mountkit::{DocsGenerator, MountedRoute};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteIndexEntry {
    pub mount_path: String,
    pub base_path: String,
    pub version: String,
    pub module: String,
    pub file: PathBuf,
    /// Mount path unmatched requests fall back to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_to: Option<String>,
}

impl From<&MountedRoute> for RouteIndexEntry {
    fn from(route: &MountedRoute) -> Self {
        Self {
            mount_path: route.mount_path.clone(),
            base_path: route.base_path.clone(),
            version: route.version.to_string(),
            module: route.module_name.clone(),
            file: route.file_path.clone(),
            fallback_to: route.fallback.as_ref().map(|f| f.to_prefix.clone()),
        }
    }
}

/// Collects mounted routes; each route file is indexed once.
#[derive(Default)]
pub struct RouteIndex {
    entries: ArcSwap<Vec<RouteIndexEntry>>,
    // file → mount path it was indexed under
    files: DashMap<PathBuf, String>,
}

impl RouteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the indexed routes, in mount order.
    pub fn entries(&self) -> Arc<Vec<RouteIndexEntry>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let entries = self.entries.load();
        serde_json::json!({ "count": entries.len(), "routes": entries.as_slice() })
    }

    fn register(&self, route: &MountedRoute) -> Option<RouteIndexEntry> {
        match self.files.entry(route.file_path.clone()) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    file = %route.file_path.display(),
                    mount_path = %route.mount_path,
                    indexed_at = %existing.get(),
                    "Duplicate route file registration; ignoring"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(route.mount_path.clone());
                Some(RouteIndexEntry::from(route))
            }
        }
    }
}

impl DocsGenerator for RouteIndex {
    fn generate(&self, routes: &[MountedRoute]) -> anyhow::Result<()> {
        let added: Vec<RouteIndexEntry> = routes.iter().filter_map(|r| self.register(r)).collect();
        if added.is_empty() {
            return Ok(());
        }

        let mut next = (*self.entries.load_full()).clone();
        next.extend(added);
        tracing::info!(routes = next.len(), "Route index updated");
        self.entries.store(Arc::new(next));
        Ok(())
    }
}
