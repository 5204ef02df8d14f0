//! Two-phase loading: every middleware before anything else.
//!
//! The phases are sequenced by the types: [`PhasedLoader::load_content`]
//! needs the [`MiddlewareSealed`] produced by
//! [`PhasedLoader::load_middlewares`], and mounting needs the
//! [`ContentSealed`] produced by the content phase. Neither token can be
//! built anywhere else.

use std::fmt;
use std::path::PathBuf;

use axum::Router;

use crate::contracts::{MiddlewareUnit, Unit, UnitLoader};
use crate::discovery::{DiscoveredUnit, DiscoveryScan, FileClassification};
use crate::error::{log_load_failure, LoadError, UnitFailure};
use crate::routes::{serve_static, MountedRoute, RouteMounter, VersionTable};
use crate::runtime::Collaborators;

/// Middleware layers in registration order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    units: Vec<MiddlewareUnit>,
}

impl MiddlewareChain {
    pub fn push(&mut self, unit: MiddlewareUnit) {
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn origins(&self) -> Vec<PathBuf> {
        self.units.iter().map(|u| u.origin.clone()).collect()
    }

    /// Wrap `router`; the first registered middleware is the outermost.
    pub fn apply(&self, router: Router) -> Router {
        self.units
            .iter()
            .rev()
            .fold(router, |router, unit| (unit.layer)(router))
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.units.iter().map(|u| &u.origin)).finish()
    }
}

/// A listener, consumer or cron job accepted by its collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub classification: FileClassification,
    pub path: PathBuf,
    /// Event, queue or job name.
    pub target: String,
}

/// Proof that the middleware phase is over.
#[derive(Debug)]
pub struct MiddlewareSealed {
    chain: MiddlewareChain,
    failures: Vec<UnitFailure>,
}

impl MiddlewareSealed {
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Proof that the content phase is over; holds everything needed to mount.
#[derive(Debug)]
pub struct ContentSealed {
    chain: MiddlewareChain,
    table: VersionTable,
    static_folders: Vec<PathBuf>,
    registrations: Vec<Registration>,
    failures: Vec<UnitFailure>,
}

impl ContentSealed {
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn table(&self) -> &VersionTable {
        &self.table
    }

    pub fn static_folders(&self) -> &[PathBuf] {
        &self.static_folders
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    /// Load and mount every route version, then attach the static folders.
    ///
    /// The returned router is not wrapped by the middleware chain yet.
    pub async fn mount(self, loader: &dyn UnitLoader, reserved_paths: &[String]) -> MountedApp {
        let outcome = RouteMounter::new(loader)
            .with_reserved_paths(reserved_paths.iter().cloned())
            .mount(&self.table)
            .await;

        let mut failures = self.failures;
        failures.extend(outcome.failures);

        MountedApp {
            router: serve_static(outcome.router, &self.static_folders),
            chain: self.chain,
            routes: outcome.mounted,
            static_folders: self.static_folders,
            registrations: self.registrations,
            failures,
        }
    }
}

/// Every unit loaded and mounted.
#[derive(Debug)]
pub struct MountedApp {
    /// Mounted route versions and static folders.
    pub router: Router,
    pub chain: MiddlewareChain,
    pub routes: Vec<MountedRoute>,
    pub static_folders: Vec<PathBuf>,
    pub registrations: Vec<Registration>,
    /// Failures of all phases, in the order they happened.
    pub failures: Vec<UnitFailure>,
}

impl MountedApp {
    /// The mounted router wrapped by the middleware chain.
    pub fn layered_router(&self) -> Router {
        self.chain.apply(self.router.clone())
    }
}

pub struct PhasedLoader<'a> {
    loader: &'a dyn UnitLoader,
    collaborators: &'a Collaborators,
}

impl<'a> PhasedLoader<'a> {
    pub fn new(loader: &'a dyn UnitLoader, collaborators: &'a Collaborators) -> Self {
        Self {
            loader,
            collaborators,
        }
    }

    /// Phase 1: load every middleware unit, in discovery order.
    pub async fn load_middlewares(&self, scan: &DiscoveryScan) -> MiddlewareSealed {
        tracing::info!("Phase: middleware");

        let mut chain = MiddlewareChain::default();
        let mut failures = Vec::new();

        for unit in scan.units_of(FileClassification::Middleware) {
            match self.loader.load(unit).await {
                Ok(Unit::Middleware(middleware)) => {
                    tracing::debug!(
                        module = %unit.module_name,
                        path = %unit.resolved_path.display(),
                        "Loaded middleware"
                    );
                    chain.push(middleware);
                }
                Ok(other) => record(&mut failures, unit, mismatch(unit, &other)),
                Err(error) => record(&mut failures, unit, error),
            }
        }

        tracing::info!(loaded = chain.len(), failed = failures.len(), "Middleware phase complete");
        MiddlewareSealed { chain, failures }
    }

    /// Phase 2: register listeners, consumers and cron jobs, collect static
    /// folders, and fill the version table. Route files are not loaded here.
    pub async fn load_content(&self, scan: &DiscoveryScan, sealed: MiddlewareSealed) -> ContentSealed {
        tracing::info!("Phase: content");

        let MiddlewareSealed {
            chain,
            mut failures,
        } = sealed;
        let mut table = VersionTable::new();
        let mut static_folders = Vec::new();
        let mut registrations = Vec::new();

        for unit in scan.units_except(FileClassification::Middleware) {
            match unit.classification {
                FileClassification::Route => {
                    table.insert_unit(unit);
                }
                FileClassification::StaticFolder => {
                    tracing::debug!(path = %unit.resolved_path.display(), "Static folder");
                    static_folders.push(unit.resolved_path.clone());
                }
                FileClassification::Listener
                | FileClassification::Consumer
                | FileClassification::CronJob => match self.load_and_register(unit).await {
                    Ok(registration) => registrations.push(registration),
                    Err(error) => record(&mut failures, unit, error),
                },
                FileClassification::Middleware | FileClassification::Ignored => {}
            }
        }

        tracing::info!(
            routes = table.len(),
            static_folders = static_folders.len(),
            registrations = registrations.len(),
            "Content phase complete"
        );

        ContentSealed {
            chain,
            table,
            static_folders,
            registrations,
            failures,
        }
    }

    async fn load_and_register(&self, unit: &DiscoveredUnit) -> Result<Registration, LoadError> {
        let loaded = self.loader.load(unit).await?;
        if loaded.classification() != unit.classification {
            return Err(mismatch(unit, &loaded));
        }

        let path = unit.resolved_path.clone();
        let c = self.collaborators;
        let (target, result) = match &loaded {
            Unit::Listener(l) => (l.event.clone(), c.event_bus.subscribe(l)),
            Unit::Consumer(q) => (q.queue.clone(), c.queue_broker.register_consumer(q)),
            Unit::Cron(j) => (j.job.clone(), c.scheduler.schedule(j)),
            Unit::Middleware(_) | Unit::Route(_) => return Err(mismatch(unit, &loaded)),
        };
        result.map_err(|e| LoadError::setup(&path, e))?;

        tracing::debug!(
            module = %unit.module_name,
            kind = %unit.classification,
            target = %target,
            path = %path.display(),
            "Registered unit"
        );
        Ok(Registration {
            classification: unit.classification,
            path,
            target,
        })
    }
}

fn mismatch(unit: &DiscoveredUnit, loaded: &Unit) -> LoadError {
    LoadError::KindMismatch {
        path: unit.resolved_path.clone(),
        expected: unit.classification,
        found: loaded.classification(),
    }
}

fn record(failures: &mut Vec<UnitFailure>, unit: &DiscoveredUnit, error: LoadError) {
    log_load_failure(&error);
    failures.push(UnitFailure::new(
        unit.resolved_path.clone(),
        unit.classification,
        error,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ConsumerUnit, CronUnit, ListenerUnit, RouteUnit};
    use crate::discovery::{discover, DiscoveryConfig};
    use crate::fs::MemoryFs;
    use crate::runtime::InProcessRegistry;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use axum::routing::get;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Builds units from file names and records every load.
    #[derive(Default)]
    struct RecordingLoader {
        log: Mutex<Vec<(FileClassification, String)>>,
    }

    #[async_trait]
    impl UnitLoader for RecordingLoader {
        async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
            let name = unit
                .resolved_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            self.log.lock().push((unit.classification, name.clone()));
            if name.starts_with("broken") {
                return Err(LoadError::parse(&unit.resolved_path, "broken"));
            }
            let origin = unit.resolved_path.clone();
            let stem = name.split('.').next().unwrap_or_default().to_string();
            Ok(match unit.classification {
                FileClassification::Middleware => {
                    let header = stem.clone();
                    Unit::Middleware(MiddlewareUnit {
                        origin,
                        layer: Arc::new(move |router: Router| {
                            let header = header.clone();
                            router.layer(axum::middleware::map_response(
                                move |mut res: axum::response::Response| {
                                    let header = header.clone();
                                    async move {
                                        let order = res
                                            .headers()
                                            .get("x-order")
                                            .and_then(|v| v.to_str().ok())
                                            .map(|v| format!("{header},{v}"))
                                            .unwrap_or(header);
                                        if let Ok(v) = HeaderValue::from_str(&order) {
                                            res.headers_mut().insert("x-order", v);
                                        }
                                        res
                                    }
                                },
                            ))
                        }),
                    })
                }
                FileClassification::Route => Unit::Route(RouteUnit {
                    origin,
                    router: Router::new().route("/", get(|| async { "ok" })),
                }),
                FileClassification::Listener => Unit::Listener(ListenerUnit {
                    origin,
                    event: stem,
                    config: serde_json::Value::Null,
                }),
                FileClassification::Consumer => Unit::Consumer(ConsumerUnit {
                    origin,
                    queue: "shared".into(),
                    config: serde_json::Value::Null,
                }),
                FileClassification::CronJob => Unit::Cron(CronUnit {
                    origin,
                    job: stem,
                    schedule: "* * * * *".into(),
                    config: serde_json::Value::Null,
                }),
                other => return Err(LoadError::parse(&unit.resolved_path, format!("{other}"))),
            })
        }
    }

    fn fixture() -> MemoryFs {
        MemoryFs::new()
            .with_file("/p/deps/mountkit-a/routes/a.router.yaml", "")
            .with_file("/p/deps/mountkit-a/middlewares/outer.middleware.yaml", "")
            .with_file("/p/deps/mountkit-a/listeners/signup.listener.yaml", "")
            .with_file("/p/modules/local/consumers/one.consumer.yaml", "")
            .with_file("/p/modules/local/consumers/two.consumer.yaml", "")
            .with_file("/p/src/routes/b.router.yaml", "")
            .with_file("/p/src/middlewares/inner.middleware.yaml", "")
            .with_file("/p/src/crons/purge.cron.yaml", "")
            .with_dir("/p/src/public")
    }

    async fn run(fs: &MemoryFs, loader: &RecordingLoader) -> MountedApp {
        let scan = discover(fs, &DiscoveryConfig::for_project("/p"));
        let registry = Arc::new(InProcessRegistry::default());
        let collaborators = Collaborators::in_process(registry);
        let phased = PhasedLoader::new(loader, &collaborators);

        let sealed = phased.load_middlewares(&scan).await;
        let content = phased.load_content(&scan, sealed).await;
        content.mount(loader, &[]).await
    }

    #[tokio::test]
    async fn all_middlewares_load_before_any_route() {
        let loader = RecordingLoader::default();
        let app = run(&fixture(), &loader).await;

        let log = loader.log.lock().clone();
        let last_middleware = log
            .iter()
            .rposition(|(c, _)| *c == FileClassification::Middleware)
            .unwrap();
        let first_route = log
            .iter()
            .position(|(c, _)| *c == FileClassification::Route)
            .unwrap();
        assert!(last_middleware < first_route);
        assert_eq!(
            log[..2],
            [
                (FileClassification::Middleware, "outer.middleware.yaml".to_string()),
                (FileClassification::Middleware, "inner.middleware.yaml".to_string()),
            ]
        );
        assert_eq!(app.routes.len(), 2);
    }

    #[tokio::test]
    async fn content_units_are_registered_and_rejections_recorded() {
        let loader = RecordingLoader::default();
        let app = run(&fixture(), &loader).await;

        let targets: Vec<_> = app.registrations.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["signup", "shared", "purge"]);

        // the second consumer of queue `shared` is refused by the broker
        assert_eq!(app.failures.len(), 1);
        assert_eq!(
            app.failures[0].path,
            PathBuf::from("/p/modules/local/consumers/two.consumer.yaml")
        );
        assert!(matches!(app.failures[0].error, LoadError::Setup { .. }));
        assert_eq!(app.static_folders, vec![PathBuf::from("/p/src/public")]);
    }

    #[tokio::test]
    async fn first_registered_middleware_is_outermost() {
        let loader = RecordingLoader::default();
        let app = run(&fixture(), &loader).await;

        let response = app
            .layered_router()
            .oneshot(Request::get("/a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // map_response runs inside-out: the outer layer sees the inner's header
        assert_eq!(response.headers()["x-order"], "outer,inner");
    }

    #[tokio::test]
    async fn failed_middleware_is_recorded_and_skipped() {
        let fs = MemoryFs::new()
            .with_file("/p/src/middlewares/broken.middleware.yaml", "")
            .with_file("/p/src/middlewares/ok.middleware.yaml", "");
        let loader = RecordingLoader::default();
        let app = run(&fs, &loader).await;

        assert_eq!(app.chain.len(), 1);
        assert_eq!(app.failures.len(), 1);
        assert_eq!(app.failures[0].classification, FileClassification::Middleware);
    }
}
