//! Declarative units.
//!
//! [`ManifestLoader`] reads unit files as YAML (`.yaml`, `.yml`) or JSON
//! (`.json`) manifests:
//!
//! ```yaml
//! # routes/users.v2.router.yaml
//! endpoints:
//!   - path: /
//!     body: [{ id: 1 }]
//!   - method: POST
//!     path: /
//!     status: 201
//!     headers: { location: /v2/users/1 }
//! ```
//!
//! Middleware manifests set response headers and reject requests missing
//! required headers; listener, consumer and cron manifests name their event,
//! queue or schedule and carry free-form `config`.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::contracts::{
    ConsumerUnit, CronUnit, ListenerUnit, MiddlewareLayer, MiddlewareUnit, RouteUnit, Unit,
    UnitLoader,
};
use crate::discovery::{split_role_stem, DiscoveredUnit, FileClassification};
use crate::error::LoadError;
use crate::fs::{FileSystem, RealFs};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteManifest {
    #[serde(default)]
    endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointSpec {
    #[serde(default = "default_method")]
    method: String,
    path: String,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MiddlewareManifest {
    set_headers: BTreeMap<String, String>,
    require_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListenerManifest {
    event: String,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsumerManifest {
    queue: String,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CronManifest {
    schedule: String,
    /// Defaults to the file stem.
    job: Option<String>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> Option<Format> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(Format::Yaml),
        "json" => Some(Format::Json),
        _ => None,
    }
}

/// Loads YAML/JSON manifests through a [`FileSystem`].
#[derive(Clone)]
pub struct ManifestLoader {
    fs: Arc<dyn FileSystem>,
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new(Arc::new(RealFs))
    }
}

impl ManifestLoader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T, LoadError> {
        let format = format_of(path).ok_or_else(|| LoadError::Unsupported {
            path: path.to_path_buf(),
        })?;
        let text = self
            .fs
            .read_to_string(path)
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        match format {
            Format::Yaml => serde_yaml::from_str(&text).map_err(|e| LoadError::parse(path, e.to_string())),
            Format::Json => serde_json::from_str(&text).map_err(|e| LoadError::parse(path, e.to_string())),
        }
    }
}

#[async_trait]
impl UnitLoader for ManifestLoader {
    async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
        let path = unit.resolved_path.as_path();
        let origin = unit.resolved_path.clone();

        match unit.classification {
            FileClassification::Route => {
                let manifest: RouteManifest = self.read(path)?;
                Ok(Unit::Route(RouteUnit {
                    router: build_route(path, manifest)?,
                    origin,
                }))
            }
            FileClassification::Middleware => {
                let manifest: MiddlewareManifest = self.read(path)?;
                Ok(Unit::Middleware(MiddlewareUnit {
                    layer: build_middleware(path, manifest)?,
                    origin,
                }))
            }
            FileClassification::Listener => {
                let m: ListenerManifest = self.read(path)?;
                Ok(Unit::Listener(ListenerUnit {
                    event: non_empty(path, "event", m.event)?,
                    config: m.config,
                    origin,
                }))
            }
            FileClassification::Consumer => {
                let m: ConsumerManifest = self.read(path)?;
                Ok(Unit::Consumer(ConsumerUnit {
                    queue: non_empty(path, "queue", m.queue)?,
                    config: m.config,
                    origin,
                }))
            }
            FileClassification::CronJob => {
                let m: CronManifest = self.read(path)?;
                let job = match m.job {
                    Some(job) => non_empty(path, "job", job)?,
                    None => split_role_stem(path, FileClassification::CronJob)
                        .unwrap_or_default()
                        .to_string(),
                };
                Ok(Unit::Cron(CronUnit {
                    job,
                    schedule: non_empty(path, "schedule", m.schedule)?,
                    config: m.config,
                    origin,
                }))
            }
            FileClassification::StaticFolder | FileClassification::Ignored => {
                Err(LoadError::Unsupported { path: origin })
            }
        }
    }
}

fn non_empty(path: &Path, field: &str, value: String) -> Result<String, LoadError> {
    if value.trim().is_empty() {
        Err(LoadError::parse(path, format!("'{field}' must not be empty")))
    } else {
        Ok(value)
    }
}

/// A fixed response.
struct Canned {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Canned {
    fn respond(&self) -> Response {
        if self.body.is_null() {
            (self.status, self.headers.clone()).into_response()
        } else {
            (self.status, self.headers.clone(), Json(self.body.clone())).into_response()
        }
    }
}

struct Endpoint {
    method: Method,
    filter: MethodFilter,
    path: String,
    canned: Canned,
}

fn build_route(path: &Path, manifest: RouteManifest) -> Result<Router, LoadError> {
    if manifest.endpoints.is_empty() {
        return Err(LoadError::parse(path, "route manifest declares no endpoints"));
    }

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut captures = CaptureSlots::default();
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for (idx, spec) in manifest.endpoints.into_iter().enumerate() {
        let endpoint = match validate_endpoint(spec) {
            Ok(endpoint) => endpoint,
            Err(message) => {
                errors.push(LoadError::parse(path, format!("endpoint #{idx}: {message}")));
                continue;
            }
        };

        if !seen.insert((endpoint.method.clone(), endpoint.path.clone())) {
            errors.push(LoadError::parse(
                path,
                format!("endpoint #{idx}: {} {} is declared twice", endpoint.method, endpoint.path),
            ));
            continue;
        }

        if let Some(existing) = captures.conflict(&endpoint.path) {
            errors.push(LoadError::parse(
                path,
                format!("endpoint #{idx}: {} conflicts with {existing}", endpoint.path),
            ));
            continue;
        }

        let canned = Arc::new(endpoint.canned);
        let handler = move || {
            let canned = canned.clone();
            async move { canned.respond() }
        };
        let method_router = by_path.remove(&endpoint.path).unwrap_or_default();
        by_path.insert(endpoint.path, method_router.on(endpoint.filter, handler));
    }

    if let Some(err) = LoadError::from_many(path, errors) {
        return Err(err);
    }

    Ok(by_path
        .into_iter()
        .fold(Router::new(), |router, (p, method_router)| router.route(&p, method_router)))
}

fn validate_endpoint(spec: EndpointSpec) -> Result<Endpoint, String> {
    let method = Method::from_bytes(spec.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid method '{}'", spec.method))?;
    let filter = MethodFilter::try_from(method.clone())
        .map_err(|_| format!("unsupported method '{}'", spec.method))?;
    validate_path(&spec.path)?;
    let status =
        StatusCode::from_u16(spec.status).map_err(|_| format!("invalid status {}", spec.status))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &spec.headers {
        let (name, value) = parse_header(name, value)?;
        headers.insert(name, value);
    }

    Ok(Endpoint {
        method,
        filter,
        path: spec.path,
        canned: Canned {
            status,
            headers,
            body: spec.body,
        },
    })
}

/// Literal segments, `{name}` captures and a trailing `{*name}` wildcard.
fn validate_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("path '{path}' must start with '/'"));
    }
    let segments: Vec<&str> = path[1..].split('/').collect();
    let mut names = HashSet::new();
    for (i, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!("path '{path}': use '{{name}}' for captures"));
        }
        if !segment.contains(['{', '}']) {
            continue;
        }
        let inner = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| format!("path '{path}': a capture must be a whole segment"))?;
        let (name, wildcard) = match inner.strip_prefix('*') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("path '{path}': invalid capture name '{name}'"));
        }
        if wildcard && i + 1 != segments.len() {
            return Err(format!("path '{path}': wildcard must be the last segment"));
        }
        if !names.insert(name) {
            return Err(format!("path '{path}': capture '{name}' is repeated"));
        }
    }
    Ok(())
}

/// The capture or wildcard claimed at each position, keyed by the literal
/// path before it. The router accepts one dynamic segment per position:
/// `/{id}` rules out `/{name}`, `/{*rest}` and `/{id}/..` under another name.
#[derive(Default)]
struct CaptureSlots {
    // prefix -> (dynamic segment, path that claimed it)
    claimed: BTreeMap<String, (String, String)>,
}

impl CaptureSlots {
    /// Claim the dynamic segments of `path`; on a clash nothing is claimed
    /// and the path holding the slot is returned.
    fn conflict(&mut self, path: &str) -> Option<String> {
        let mut claims = Vec::new();
        let mut prefix = String::new();
        for segment in path.split('/').skip(1) {
            if segment.starts_with('{') {
                match self.claimed.get(&prefix) {
                    Some((taken, owner)) if taken != segment => return Some(owner.clone()),
                    Some(_) => {}
                    None => claims.push((prefix.clone(), segment.to_string())),
                }
            }
            prefix.push('/');
            prefix.push_str(segment);
        }
        for (prefix, segment) in claims {
            self.claimed.insert(prefix, (segment, path.to_string()));
        }
        None
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), String> {
    let name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name '{name}'"))?;
    let value =
        HeaderValue::from_str(value).map_err(|_| format!("invalid value for header '{name}'"))?;
    Ok((name, value))
}

/// Header rules of one middleware manifest.
struct HeaderPolicy {
    set: Vec<(HeaderName, HeaderValue)>,
    require: Vec<HeaderName>,
}

impl HeaderPolicy {
    async fn handle(&self, req: Request, next: Next) -> Response {
        if let Some(missing) = self.require.iter().find(|h| !req.headers().contains_key(*h)) {
            tracing::debug!(header = %missing, uri = %req.uri(), "Rejecting request without required header");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "missing required header",
                    "header": missing.as_str(),
                })),
            )
                .into_response();
        }

        let mut response = next.run(req).await;
        for (name, value) in &self.set {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }
}

fn build_middleware(path: &Path, manifest: MiddlewareManifest) -> Result<MiddlewareLayer, LoadError> {
    let mut errors = Vec::new();
    let mut set = Vec::new();
    let mut require = Vec::new();

    for (name, value) in &manifest.set_headers {
        match parse_header(name, value) {
            Ok(pair) => set.push(pair),
            Err(message) => errors.push(LoadError::parse(path, message)),
        }
    }
    for name in &manifest.require_headers {
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => require.push(name),
            Err(_) => errors.push(LoadError::parse(path, format!("invalid header name '{name}'"))),
        }
    }
    if let Some(err) = LoadError::from_many(path, errors) {
        return Err(err);
    }

    let policy = Arc::new(HeaderPolicy { set, require });
    Ok(Arc::new(move |router: Router| {
        let policy = policy.clone();
        router.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            let policy = policy.clone();
            async move { policy.handle(req, next).await }
        }))
    }))
}

/// A loader backed by an async closure, for units built in code.
pub struct FnLoader<F> {
    f: F,
}

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> UnitLoader for FnLoader<F>
where
    F: Fn(DiscoveredUnit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Unit, LoadError>> + Send + 'static,
{
    async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
        (self.f)(unit.clone()).await
    }
}
