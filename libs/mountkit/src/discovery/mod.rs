//! Module discovery: registry, walker, classification and overrides.

pub mod classify;
pub mod config;
pub mod overrides;
pub mod registry;
pub mod walker;

pub use classify::{
    classify_entry, classify_file, split_role, split_role_stem, EntryKind, FileClassification,
    PUBLIC_DIR,
};
pub use config::DiscoveryConfig;
pub use overrides::{OverrideResolver, Resolved};
pub use registry::{ModuleDescriptor, ModuleRegistry, ModuleSource, WalkSource, PROJECT_TREE};
pub use walker::{DiscoveredUnit, Walk, Walker};

use crate::error::ScanError;
use crate::fs::FileSystem;

/// Units found in one walked tree.
#[derive(Debug, Clone)]
pub struct SourceScan {
    pub source: WalkSource,
    pub units: Vec<DiscoveredUnit>,
}

/// Every tree walked once, in load order.
///
/// Both loader phases iterate this result instead of walking again, so the
/// two phases always see the same units.
#[derive(Debug, Default)]
pub struct DiscoveryScan {
    pub modules: Vec<ModuleDescriptor>,
    pub sources: Vec<SourceScan>,
    pub scan_errors: Vec<ScanError>,
}

impl DiscoveryScan {
    /// All units of the given classification, in load order.
    pub fn units_of(
        &self,
        classification: FileClassification,
    ) -> impl Iterator<Item = &DiscoveredUnit> + '_ {
        self.sources
            .iter()
            .flat_map(|s| s.units.iter())
            .filter(move |u| u.classification == classification)
    }

    /// All units except the given classification, in load order.
    pub fn units_except(
        &self,
        classification: FileClassification,
    ) -> impl Iterator<Item = &DiscoveredUnit> + '_ {
        self.sources
            .iter()
            .flat_map(|s| s.units.iter())
            .filter(move |u| u.classification != classification)
    }
}

/// Resolve modules and walk installed modules, local modules and the
/// project tree, in that order.
pub fn discover(fs: &dyn FileSystem, cfg: &DiscoveryConfig) -> DiscoveryScan {
    let mut registry = ModuleRegistry::discover(fs, cfg);
    let mut scan_errors = registry.take_scan_errors();
    let walker = Walker::new(fs);

    let sources = registry
        .walk_sources()
        .into_iter()
        .map(|source| {
            let walk = walker.walk(&source.name, &source.root, source.override_root.as_deref());
            scan_errors.extend(walk.scan_errors);
            SourceScan {
                source,
                units: walk.units,
            }
        })
        .collect::<Vec<_>>();

    tracing::info!(
        modules = registry.modules().len(),
        units = sources.iter().map(|s| s.units.len()).sum::<usize>(),
        scan_errors = scan_errors.len(),
        "Discovery completed"
    );

    DiscoveryScan {
        modules: registry.modules().to_vec(),
        sources,
        scan_errors,
    }
}
