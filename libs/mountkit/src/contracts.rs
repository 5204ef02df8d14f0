use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::discovery::{DiscoveredUnit, FileClassification};
use crate::error::LoadError;
use crate::routes::MountedRoute;

/// Wraps a router with cross-cutting behavior.
pub type MiddlewareLayer = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// A loaded middleware unit.
#[derive(Clone)]
pub struct MiddlewareUnit {
    pub origin: PathBuf,
    pub layer: MiddlewareLayer,
}

impl fmt::Debug for MiddlewareUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareUnit")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// A loaded route unit: a handler router mounted under its version path.
#[derive(Debug)]
pub struct RouteUnit {
    pub origin: PathBuf,
    pub router: Router,
}

#[derive(Debug, Clone)]
pub struct ListenerUnit {
    pub origin: PathBuf,
    pub event: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ConsumerUnit {
    pub origin: PathBuf,
    pub queue: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CronUnit {
    pub origin: PathBuf,
    pub job: String,
    /// Cron expression, five or six fields.
    pub schedule: String,
    pub config: serde_json::Value,
}

/// Result of loading one discovered file.
#[derive(Debug)]
pub enum Unit {
    Middleware(MiddlewareUnit),
    Route(RouteUnit),
    Listener(ListenerUnit),
    Consumer(ConsumerUnit),
    Cron(CronUnit),
}

impl Unit {
    pub fn classification(&self) -> FileClassification {
        match self {
            Unit::Middleware(_) => FileClassification::Middleware,
            Unit::Route(_) => FileClassification::Route,
            Unit::Listener(_) => FileClassification::Listener,
            Unit::Consumer(_) => FileClassification::Consumer,
            Unit::Cron(_) => FileClassification::CronJob,
        }
    }

    pub fn origin(&self) -> &Path {
        match self {
            Unit::Middleware(u) => &u.origin,
            Unit::Route(u) => &u.origin,
            Unit::Listener(u) => &u.origin,
            Unit::Consumer(u) => &u.origin,
            Unit::Cron(u) => &u.origin,
        }
    }
}

/// Turns a discovered file into a unit.
///
/// Called sequentially, one unit at a time, in discovery order.
#[async_trait]
pub trait UnitLoader: Send + Sync {
    async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError>;
}

/// Receives event listeners. A rejected subscription fails the unit.
pub trait EventBus: Send + Sync {
    fn subscribe(&self, listener: &ListenerUnit) -> anyhow::Result<()>;
}

pub trait QueueBroker: Send + Sync {
    fn register_consumer(&self, consumer: &ConsumerUnit) -> anyhow::Result<()>;
}

pub trait JobScheduler: Send + Sync {
    fn schedule(&self, job: &CronUnit) -> anyhow::Result<()>;
}

/// Documents the mounted routes. Failures are logged, never fatal.
pub trait DocsGenerator: Send + Sync {
    fn generate(&self, routes: &[MountedRoute]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Emitted once, after every route family is mounted.
    RoutesMounted { routes: usize },
}

pub trait LifecycleEmitter: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// REST host: handles ingress hosting with prepare/finalize phases.
#[async_trait]
pub trait IngressHost: Send + Sync + 'static {
    /// Prepare a base Router (e.g. /health). Do NOT start the server here.
    fn rest_prepare(&self, router: Router) -> anyhow::Result<Router>;

    /// Paths the host owns; mounted routes must not claim them.
    fn reserved_paths(&self) -> Vec<String> {
        Vec::new()
    }

    /// Attach host endpoints and the ingress stack, and keep the final Router.
    fn rest_finalize(&self, router: Router) -> anyhow::Result<Router>;

    /// Serve the finalized Router until `cancel` fires.
    async fn serve(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}
