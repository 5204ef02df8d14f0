//! The ingress as the host of a full boot.

use std::path::Path;
use std::sync::Arc;

use api_ingress::{ApiIngress, ApiIngressConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use mountkit::{
    Boot, Collaborators, DiscoveryConfig, HostRuntime, LoadError, ManifestLoader,
};
use tempfile::TempDir;
use tower::ServiceExt;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

async fn boot(root: &Path, ingress: Arc<ApiIngress>) -> Boot {
    let collaborators = Collaborators::default().with_docs(ingress.route_index());
    HostRuntime::new(
        DiscoveryConfig::for_project(root),
        Arc::new(ManifestLoader::default()),
        collaborators,
    )
    .with_host(ingress)
    .boot()
    .await
    .unwrap()
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let res = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn mounted_routes_are_indexed_and_served_through_the_stack() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "src/routes/users.router.yaml",
        "endpoints:\n  - { path: /, body: [v1] }\n  - { path: /legacy, body: legacy }\n",
    );
    write(root, "src/routes/users.v2.router.yaml", "endpoints:\n  - { path: /, body: [v2] }\n");

    let ingress = Arc::new(ApiIngress::default());
    let boot = boot(root, ingress.clone()).await;
    assert!(boot.report.is_clean());

    let (status, body) = get_json(&boot.router, "/v2/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["v2"]));

    // v2 has no /legacy; it falls back to the default version
    let (_, body) = get_json(&boot.router, "/v2/users/legacy").await;
    assert_eq!(body, "legacy");

    let (status, index) = get_json(&boot.router, "/_routes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(index["count"], 2);
    assert_eq!(index["routes"][0]["mount_path"], "/users");
    assert_eq!(index["routes"][1]["mount_path"], "/v2/users");
    assert_eq!(index["routes"][1]["fallback_to"], "/users");
    assert_eq!(ingress.route_index().len(), 2);

    let (_, health) = get_json(&boot.router, "/health").await;
    assert_eq!(health["status"], "ok");

    let res = boot
        .router
        .clone()
        .oneshot(Request::get("/users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn routes_cannot_claim_host_paths() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "src/routes/health.router.yaml", "endpoints:\n  - { path: /, body: hijacked }\n");
    write(root, "src/routes/meta.router.yaml", "endpoints:\n  - { path: /, body: meta }\n");

    let ingress = Arc::new(ApiIngress::new(ApiIngressConfig {
        route_index_path: "/meta".into(),
        ..Default::default()
    }));
    let boot = boot(root, ingress).await;

    assert!(boot.report.mounted.is_empty());
    assert_eq!(boot.report.failures.len(), 2);
    assert!(boot
        .report
        .failures
        .iter()
        .all(|f| matches!(f.error, LoadError::MountConflict { .. })));

    let (_, health) = get_json(&boot.router, "/health").await;
    assert_eq!(health["status"], "ok");
    let (_, index) = get_json(&boot.router, "/meta").await;
    assert_eq!(index["count"], 0);
}
