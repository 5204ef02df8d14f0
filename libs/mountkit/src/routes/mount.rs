//! Version mounting with one-hop fallback to the previous version.
//!
//! For each base path the versions are loaded in order. The first loaded
//! version is mounted plainly; every later one gets a fallback that strips its
//! own prefix and re-dispatches the request, once, to the previously mounted
//! version's handlers.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{OriginalUri, Request};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::contracts::{Unit, UnitLoader};
use crate::discovery::{DiscoveredUnit, FileClassification};
use crate::error::{log_load_failure, LoadError, UnitFailure};
use crate::routes::table::{RouteRegistration, VersionTable};
use crate::routes::version::Version;

/// Unmatched requests under `from_prefix` are retried under `to_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRule {
    pub from_prefix: String,
    pub to_prefix: String,
}

impl FallbackRule {
    /// Rewrite a full request path, `None` if it is not under `from_prefix`.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        let rest = strip_mount_prefix(path, &self.from_prefix)?;
        Some(join_mount_path(&self.to_prefix, rest))
    }
}

/// One mounted route version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedRoute {
    pub mount_path: String,
    pub base_path: String,
    pub version: Version,
    pub file_path: PathBuf,
    pub module_name: String,
    pub fallback: Option<FallbackRule>,
}

/// Router with every loaded route version, plus what happened while mounting.
#[derive(Debug, Default)]
pub struct MountOutcome {
    pub router: Router,
    pub mounted: Vec<MountedRoute>,
    pub failures: Vec<UnitFailure>,
}

pub struct RouteMounter<'a> {
    loader: &'a dyn UnitLoader,
    taken: HashSet<String>,
}

impl<'a> RouteMounter<'a> {
    pub fn new(loader: &'a dyn UnitLoader) -> Self {
        Self {
            loader,
            taken: HashSet::new(),
        }
    }

    /// Paths owned by the ingress host; route versions mounted there are rejected.
    pub fn with_reserved_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taken.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Load and mount every version in `table`, base paths in sorted order.
    pub async fn mount(mut self, table: &VersionTable) -> MountOutcome {
        let mut out = MountOutcome::default();

        for group in table.groups() {
            // (mount path, handler router without fallback) of the last mounted version
            let mut previous: Option<(String, Router)> = None;

            for reg in group.versions {
                let router = match self.load_route(&reg).await {
                    Ok(router) => router,
                    Err(error) => {
                        log_load_failure(&error);
                        out.failures.push(UnitFailure::new(
                            reg.file_path.clone(),
                            FileClassification::Route,
                            error,
                        ));
                        continue;
                    }
                };

                let mount_path = reg.version.mount_path(&reg.base_path);
                if let Err(error) = self.claim(&reg, &mount_path) {
                    log_load_failure(&error);
                    out.failures.push(UnitFailure::new(
                        reg.file_path.clone(),
                        FileClassification::Route,
                        error,
                    ));
                    continue;
                }

                let fallback = previous.as_ref().map(|(prev_mount, _)| FallbackRule {
                    from_prefix: mount_path.clone(),
                    to_prefix: prev_mount.clone(),
                });

                let handler = match (&previous, &fallback) {
                    // unmatched paths and unmatched methods both go back one version
                    (Some((_, prev_router)), Some(rule)) => router
                        .clone()
                        .method_not_allowed_fallback(redispatch(prev_router.clone(), rule.clone()))
                        .fallback(redispatch(prev_router.clone(), rule.clone())),
                    _ => router.clone(),
                };

                out.router = if mount_path == "/" {
                    out.router.merge(handler)
                } else {
                    out.router.nest(&mount_path, handler)
                };

                tracing::info!(
                    base_path = %reg.base_path,
                    version = %reg.version,
                    mount_path = %mount_path,
                    fallback_to = fallback.as_ref().map(|f| f.to_prefix.as_str()),
                    path = %reg.file_path.display(),
                    "Mounted route"
                );

                out.mounted.push(MountedRoute {
                    mount_path: mount_path.clone(),
                    base_path: reg.base_path.clone(),
                    version: reg.version.clone(),
                    file_path: reg.file_path.clone(),
                    module_name: reg.module_name.clone(),
                    fallback,
                });
                previous = Some((mount_path, router));
            }
        }

        out
    }

    async fn load_route(&self, reg: &RouteRegistration) -> Result<Router, LoadError> {
        validate_base_path(reg)?;
        let unit = DiscoveredUnit {
            classification: FileClassification::Route,
            resolved_path: reg.file_path.clone(),
            module_name: reg.module_name.clone(),
        };
        match self.loader.load(&unit).await? {
            Unit::Route(route) => Ok(route.router),
            other => Err(LoadError::KindMismatch {
                path: reg.file_path.clone(),
                expected: FileClassification::Route,
                found: other.classification(),
            }),
        }
    }

    fn claim(&mut self, reg: &RouteRegistration, mount_path: &str) -> Result<(), LoadError> {
        if self.taken.insert(mount_path.to_string()) {
            Ok(())
        } else {
            Err(LoadError::MountConflict {
                path: reg.file_path.clone(),
                mount_path: mount_path.to_string(),
            })
        }
    }
}

/// Base paths become literal router paths; reject anything the router would
/// read as a parameter or wildcard.
fn validate_base_path(reg: &RouteRegistration) -> Result<(), LoadError> {
    let ok = reg.base_path.starts_with('/')
        && reg.base_path[1..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if ok {
        Ok(())
    } else {
        Err(LoadError::parse(
            &reg.file_path,
            format!("'{}' is not a valid route base path", reg.base_path),
        ))
    }
}

/// Remainder of `path` below `prefix` (`/` when nothing remains).
fn strip_mount_prefix<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    if prefix == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn join_mount_path(prefix: &str, rest: &str) -> String {
    match (prefix, rest) {
        ("/", rest) => rest.to_string(),
        (prefix, "/") => prefix.to_string(),
        (prefix, rest) => format!("{prefix}{rest}"),
    }
}

type FallbackFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Fallback handler that sends an unmatched request to the predecessor's
/// handlers. The predecessor carries no fallback of its own, so a request is
/// re-dispatched at most once.
fn redispatch(
    predecessor: Router,
    rule: FallbackRule,
) -> impl Fn(OriginalUri, Request) -> FallbackFuture + Clone + Send + Sync + 'static {
    move |OriginalUri(original): OriginalUri, mut req: Request| -> FallbackFuture {
        let predecessor = predecessor.clone();
        let rule = rule.clone();
        Box::pin(async move {
            let Some(rest) = strip_mount_prefix(original.path(), &rule.from_prefix) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let target = match original.query() {
                Some(query) => format!("{rest}?{query}"),
                None => rest.to_string(),
            };
            match target.parse::<Uri>() {
                Ok(uri) => *req.uri_mut() = uri,
                Err(_) => return StatusCode::NOT_FOUND.into_response(),
            }

            tracing::debug!(
                from = %original.path(),
                to_prefix = %rule.to_prefix,
                "Falling back to previous route version"
            );

            match predecessor.oneshot(req).await {
                Ok(response) => response,
                Err(err) => match err {},
            }
        })
    }
}

/// Serve `folders` (first match wins) for requests no route answered.
///
/// Only `GET` and `HEAD` are served. Must be called before layers are
/// applied to `router`.
pub fn serve_static(router: Router, folders: &[PathBuf]) -> Router {
    if folders.is_empty() {
        return router;
    }
    let folders: Arc<[PathBuf]> = folders.into();
    router.fallback(move |req: Request| {
        let folders = folders.clone();
        async move { serve_from_folders(&folders, req).await }
    })
}

async fn serve_from_folders(folders: &[PathBuf], req: Request) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::NOT_FOUND.into_response();
    }

    for dir in folders {
        let mut probe = Request::new(Body::empty());
        *probe.method_mut() = req.method().clone();
        *probe.uri_mut() = req.uri().clone();
        *probe.headers_mut() = req.headers().clone();

        match ServeDir::new(dir).oneshot(probe).await {
            Ok(response) if response.status() != StatusCode::NOT_FOUND => {
                return response.map(Body::new);
            }
            Ok(_) => {}
            Err(err) => match err {},
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http;
    use axum::routing::{get, post};
    use std::collections::HashMap;

    use crate::contracts::RouteUnit;
    use crate::loader::FnLoader;

    /// Answers `/x` with the file name of the unit that served it.
    struct StubLoader {
        failing: Vec<&'static str>,
        /// Extra route per file, answering `<file> extra`.
        extra: HashMap<&'static str, &'static str>,
        /// Files that also answer `/echo` with the URI they received.
        echo: Vec<&'static str>,
    }

    impl StubLoader {
        fn new() -> Self {
            Self {
                failing: Vec::new(),
                extra: HashMap::new(),
                echo: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl UnitLoader for StubLoader {
        async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
            let name = unit
                .resolved_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            if self.failing.iter().any(|f| *f == name) {
                return Err(LoadError::parse(&unit.resolved_path, "boom"));
            }
            let tag = name.clone();
            let mut router = Router::new().route("/x", get(move || async move { tag }));
            if let Some(path) = self.extra.get(name.as_str()) {
                let tag = format!("{name} extra");
                router = router.route(path, get(move || async move { tag }));
            }
            if self.echo.iter().any(|f| *f == name) {
                router = router.route("/echo", get(|uri: Uri| async move { uri.to_string() }));
            }
            Ok(Unit::Route(RouteUnit {
                origin: unit.resolved_path.clone(),
                router,
            }))
        }
    }

    fn table(files: &[&str]) -> VersionTable {
        let mut table = VersionTable::new();
        for file in files {
            table.insert_unit(&DiscoveredUnit {
                classification: FileClassification::Route,
                resolved_path: PathBuf::from(format!("/m/routes/{file}")),
                module_name: "m".into(),
            });
        }
        table
    }

    async fn get_text(router: &Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn newer_version_falls_back_to_previous() {
        let mut loader = StubLoader::new();
        loader.extra.insert("a.v10.router.yaml", "/only-in-10");
        let table = table(&["a.v2.router.yaml", "a.v10.router.yaml"]);

        let out = RouteMounter::new(&loader).mount(&table).await;
        let paths: Vec<_> = out.mounted.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/v2/a", "/v10/a"]);
        assert_eq!(out.mounted[0].fallback, None);
        assert_eq!(
            out.mounted[1].fallback,
            Some(FallbackRule {
                from_prefix: "/v10/a".into(),
                to_prefix: "/v2/a".into()
            })
        );

        assert_eq!(get_text(&out.router, "/v10/a/x").await.1, "a.v10.router.yaml");
        assert_eq!(get_text(&out.router, "/v2/a/x").await.1, "a.v2.router.yaml");
        assert_eq!(
            get_text(&out.router, "/v10/a/only-in-10").await.1,
            "a.v10.router.yaml extra"
        );
        // not in v2 either
        assert_eq!(get_text(&out.router, "/v10/a/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get_text(&out.router, "/v2/a/only-in-10").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn method_mismatch_falls_back_to_previous() {
        let loader = FnLoader::new(|unit: DiscoveredUnit| async move {
            let v1 = unit.resolved_path.ends_with("items.v1.router.yaml");
            let router = if v1 {
                Router::new().route("/x", post(|| async { "v1 post" }))
            } else {
                Router::new().route("/x", get(|| async { "v2 get" }))
            };
            Ok::<_, LoadError>(Unit::Route(RouteUnit {
                origin: unit.resolved_path,
                router,
            }))
        });
        let table = table(&["items.v1.router.yaml", "items.v2.router.yaml"]);
        let out = RouteMounter::new(&loader).mount(&table).await;

        let post_x = |uri: &str| http::Request::post(uri).body(Body::empty()).unwrap();
        let res = out.router.clone().oneshot(post_x("/v2/items/x")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"v1 post");

        assert_eq!(get_text(&out.router, "/v2/items/x").await.1, "v2 get");
        // v1 has no GET /x and nothing to fall back to
        assert_eq!(
            get_text(&out.router, "/v1/items/x").await.0,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn fallback_is_a_single_hop() {
        let mut loader = StubLoader::new();
        loader.extra.insert("a.v1.router.yaml", "/legacy");
        let table = table(&["a.v1.router.yaml", "a.v2.router.yaml", "a.v3.router.yaml"]);

        let out = RouteMounter::new(&loader).mount(&table).await;
        assert_eq!(
            get_text(&out.router, "/v2/a/legacy").await.1,
            "a.v1.router.yaml extra"
        );
        // v3 only reaches v2, which has no /legacy of its own
        assert_eq!(get_text(&out.router, "/v3/a/legacy").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn default_version_mounts_at_base_path() {
        let loader = StubLoader::new();
        let table = table(&["b.v3.router.yaml", "b.router.yaml"]);

        let out = RouteMounter::new(&loader).mount(&table).await;
        let paths: Vec<_> = out.mounted.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/v3/b"]);
        assert_eq!(out.mounted[1].fallback.as_ref().unwrap().to_prefix, "/b");
        assert_eq!(get_text(&out.router, "/b/x").await.1, "b.router.yaml");
        assert_eq!(get_text(&out.router, "/v3/b/x").await.1, "b.v3.router.yaml");
    }

    #[tokio::test]
    async fn failed_version_is_skipped_and_fallback_bridges_it() {
        let mut loader = StubLoader::new();
        loader.failing.push("a.v2.router.yaml");
        loader.extra.insert("a.v1.router.yaml", "/old");
        let table = table(&["a.v1.router.yaml", "a.v2.router.yaml", "a.v3.router.yaml"]);

        let out = RouteMounter::new(&loader).mount(&table).await;
        let paths: Vec<_> = out.mounted.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/v1/a", "/v3/a"]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].path, PathBuf::from("/m/routes/a.v2.router.yaml"));
        assert_eq!(get_text(&out.router, "/v3/a/old").await.1, "a.v1.router.yaml extra");
        assert_eq!(get_text(&out.router, "/v2/a/x").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn first_loaded_version_is_the_plain_mount() {
        let mut loader = StubLoader::new();
        loader.failing.push("b.router.yaml");
        let table = table(&["b.router.yaml", "b.v3.router.yaml"]);

        let out = RouteMounter::new(&loader).mount(&table).await;
        assert_eq!(out.mounted.len(), 1);
        assert_eq!(out.mounted[0].mount_path, "/v3/b");
        assert_eq!(out.mounted[0].fallback, None);
    }

    #[tokio::test]
    async fn fallback_rewrites_path_and_keeps_query() {
        let mut loader = StubLoader::new();
        loader.echo.push("c.v1.router.yaml");
        let table = table(&["c.v1.router.yaml", "c.v2.router.yaml"]);
        let out = RouteMounter::new(&loader).mount(&table).await;

        let rule = out.mounted[1].fallback.clone().unwrap();
        assert_eq!(rule.rewrite("/v2/c/x").as_deref(), Some("/v1/c/x"));
        assert_eq!(rule.rewrite("/v2/c").as_deref(), Some("/v1/c"));
        assert_eq!(rule.rewrite("/v2/cx"), None);

        assert_eq!(get_text(&out.router, "/v1/c/echo?page=2").await.1, "/echo?page=2");
        assert_eq!(get_text(&out.router, "/v2/c/echo?page=2").await.1, "/echo?page=2");
    }

    #[tokio::test]
    async fn reserved_mount_paths_are_rejected() {
        let loader = StubLoader::new();
        let table = table(&["health.router.yaml", "users.router.yaml"]);

        let out = RouteMounter::new(&loader)
            .with_reserved_paths(["/health"])
            .mount(&table)
            .await;

        let paths: Vec<_> = out.mounted.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/users"]);
        assert_eq!(out.failures.len(), 1);
        assert!(matches!(
            &out.failures[0].error,
            LoadError::MountConflict { mount_path, .. } if mount_path == "/health"
        ));
    }

    #[tokio::test]
    async fn invalid_base_path_is_a_load_failure() {
        let loader = StubLoader::new();
        let table = table(&["{id}.router.yaml", "ok.router.yaml"]);
        let out = RouteMounter::new(&loader).mount(&table).await;
        assert_eq!(out.mounted.len(), 1);
        assert_eq!(out.mounted[0].mount_path, "/ok");
        assert!(matches!(out.failures[0].error, LoadError::Parse { .. }));
    }

    #[tokio::test]
    async fn wrong_unit_kind_is_rejected() {
        struct ListenerLoader;

        #[async_trait]
        impl UnitLoader for ListenerLoader {
            async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
                Ok(Unit::Listener(crate::contracts::ListenerUnit {
                    origin: unit.resolved_path.clone(),
                    event: "e".into(),
                    config: serde_json::Value::Null,
                }))
            }
        }

        let out = RouteMounter::new(&ListenerLoader)
            .mount(&table(&["a.router.yaml"]))
            .await;
        assert!(out.mounted.is_empty());
        assert!(matches!(
            out.failures[0].error,
            LoadError::KindMismatch {
                found: FileClassification::Listener,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn static_folders_answer_unrouted_gets() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.txt"), "first").unwrap();
        std::fs::write(second.path().join("a.txt"), "second").unwrap();
        std::fs::write(second.path().join("b.txt"), "only second").unwrap();

        let router = serve_static(
            Router::new().route("/api", get(|| async { "api" })),
            &[first.path().to_path_buf(), second.path().to_path_buf()],
        );

        assert_eq!(get_text(&router, "/api").await.1, "api");
        assert_eq!(get_text(&router, "/a.txt").await.1, "first");
        assert_eq!(get_text(&router, "/b.txt").await.1, "only second");
        assert_eq!(get_text(&router, "/c.txt").await.0, StatusCode::NOT_FOUND);

        let post = router
            .clone()
            .oneshot(http::Request::post("/a.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(post.status(), StatusCode::NOT_FOUND);
    }
}
