//! Host Runtime - orchestrates one boot
//!
//! Phases: discover → middleware → content → mount → docs → REST compose →
//! `RoutesMounted`. Unit failures are collected into the [`BootReport`];
//! only the ingress host can abort a boot.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;

use crate::contracts::{IngressHost, LifecycleEvent, UnitLoader};
use crate::discovery::{discover, DiscoveryConfig, FileClassification, ModuleDescriptor};
use crate::error::{error_chain, BootError, ScanError, UnitFailure};
use crate::fs::{FileSystem, RealFs};
use crate::loader::{PhasedLoader, Registration};
use crate::routes::MountedRoute;
use crate::runtime::Collaborators;

/// What a boot discovered, loaded, mounted and skipped.
#[derive(Debug, Default)]
pub struct BootReport {
    pub modules: Vec<ModuleDescriptor>,
    /// Loaded middleware files, outermost first.
    pub middlewares: Vec<PathBuf>,
    pub registrations: Vec<Registration>,
    pub static_folders: Vec<PathBuf>,
    pub mounted: Vec<MountedRoute>,
    pub failures: Vec<UnitFailure>,
    pub scan_errors: Vec<ScanError>,
}

impl BootReport {
    /// Registrations of one kind (listener, consumer or cron).
    pub fn registered(&self, classification: FileClassification) -> usize {
        self.registrations
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.scan_errors.is_empty()
    }

    /// `(mount path, version, fallback target)` for every mounted route.
    pub fn mount_plan(&self) -> Vec<(String, String, Option<String>)> {
        self.mounted
            .iter()
            .map(|m| {
                (
                    m.mount_path.clone(),
                    m.version.to_string(),
                    m.fallback.as_ref().map(|f| f.to_prefix.clone()),
                )
            })
            .collect()
    }
}

/// Result of a boot: the composed router and its report.
#[derive(Debug)]
pub struct Boot {
    pub router: Router,
    pub report: BootReport,
}

/// HostRuntime owns everything a boot needs.
pub struct HostRuntime {
    fs: Arc<dyn FileSystem>,
    discovery: DiscoveryConfig,
    loader: Arc<dyn UnitLoader>,
    collaborators: Collaborators,
    host: Option<Arc<dyn IngressHost>>,
}

impl HostRuntime {
    pub fn new(
        discovery: DiscoveryConfig,
        loader: Arc<dyn UnitLoader>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            fs: Arc::new(RealFs),
            discovery,
            loader,
            collaborators,
            host: None,
        }
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Compose the final router through `host` (prepare → routes → finalize).
    pub fn with_host(mut self, host: Arc<dyn IngressHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Discover, load and mount everything once.
    pub async fn boot(&self) -> Result<Boot, BootError> {
        tracing::info!(
            project_root = %self.discovery.project_root.display(),
            "Phase: discover"
        );
        let scan = discover(self.fs.as_ref(), &self.discovery);

        let phased = PhasedLoader::new(self.loader.as_ref(), &self.collaborators);
        let middlewares = phased.load_middlewares(&scan).await;
        let content = phased.load_content(&scan, middlewares).await;

        tracing::info!(route_files = content.table().len(), "Phase: mount");
        let reserved = self
            .host
            .as_ref()
            .map(|h| h.reserved_paths())
            .unwrap_or_default();
        let app = content.mount(self.loader.as_ref(), &reserved).await;

        if let Err(e) = self.collaborators.docs.generate(&app.routes) {
            tracing::warn!(error = %error_chain(&*e), "Route documentation failed");
        }

        let routes = app.layered_router();
        let router = match &self.host {
            Some(host) => self.compose(host.as_ref(), routes)?,
            None => routes,
        };

        self.collaborators
            .lifecycle
            .emit(LifecycleEvent::RoutesMounted {
                routes: app.routes.len(),
            });

        let report = BootReport {
            modules: scan.modules,
            middlewares: app.chain.origins(),
            registrations: app.registrations,
            static_folders: app.static_folders,
            mounted: app.routes,
            failures: app.failures,
            scan_errors: scan.scan_errors,
        };

        tracing::info!(
            modules = report.modules.len(),
            middlewares = report.middlewares.len(),
            mounted = report.mounted.len(),
            static_folders = report.static_folders.len(),
            failures = report.failures.len(),
            scan_errors = report.scan_errors.len(),
            "Boot complete"
        );

        Ok(Boot { router, report })
    }

    /// REST phase: host prepare, mounted routes, host finalize.
    fn compose(&self, host: &dyn IngressHost, routes: Router) -> Result<Router, BootError> {
        tracing::info!("Phase: rest");

        let router = host
            .rest_prepare(Router::new())
            .map_err(|source| BootError::RestPrepare { source })?;

        host.rest_finalize(router.merge(routes))
            .map_err(|source| BootError::RestFinalize { source })
    }
}
