//! HTTP ingress for a mountkit application.
//!
//! [`ApiIngress`] is the [`IngressHost`] of a boot: it contributes `/health`
//! and the route index, wraps the composed router in the request stack
//! (request id, tracing, timeout, body limit, CORS) and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{middleware::from_fn, routing::get, Json, Router};
use mountkit::IngressHost;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

mod config;
mod cors;
pub mod middleware;
mod route_index;
mod web;

pub use config::{ApiIngressConfig, CorsConfig};
pub use route_index::{RouteIndex, RouteIndexEntry};

pub const HEALTH_PATH: &str = "/health";

pub struct ApiIngress {
    config: ArcSwap<ApiIngressConfig>,
    index: Arc<RouteIndex>,
    // Finalized router from the REST phase, taken by `serve`
    final_router: Mutex<Option<Router>>,
}

impl Default for ApiIngress {
    fn default() -> Self {
        Self::new(ApiIngressConfig::default())
    }
}

impl ApiIngress {
    pub fn new(config: ApiIngressConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            index: Arc::new(RouteIndex::new()),
            final_router: Mutex::new(None),
        }
    }

    pub fn get_config(&self) -> ApiIngressConfig {
        (**self.config.load()).clone()
    }

    /// Replace the configuration; takes effect at the next `rest_finalize`.
    pub fn update_config(&self, config: ApiIngressConfig) {
        self.config.store(Arc::new(config));
    }

    /// Docs generator to hand to the runtime's collaborators.
    pub fn route_index(&self) -> Arc<RouteIndex> {
        self.index.clone()
    }

    /// Wrap `router` in the request stack.
    ///
    /// Outermost to innermost: SetRequestId -> PropagateRequestId -> Trace ->
    /// push_req_id_to_extensions -> Timeout -> BodyLimit -> CORS -> router.
    /// `Router::layer` wraps everything added before, so layers are applied
    /// innermost first.
    fn apply_middleware_stack(&self, mut router: Router) -> Router {
        let config = self.get_config();
        let x_request_id = middleware::request_id::header();

        // 1. CORS answers preflight before limits apply
        if let Some(layer) = cors::build_cors_layer(&config) {
            router = router.layer(layer);
        }

        // 2. Body limit
        router = router.layer(RequestBodyLimitLayer::new(config.body_limit_bytes));

        // 3. Handler deadline
        router = router.layer(TimeoutLayer::new(config.request_timeout));

        // 4. Record request_id into span + extensions (span must exist first)
        router = router.layer(from_fn(middleware::request_id::push_req_id_to_extensions));

        // 5. The http span with request_id/status/latency
        router = router.layer({
            use tower_http::trace::TraceLayer;
            use tracing::field::Empty;

            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                    let rid = req
                        .headers()
                        .get(middleware::request_id::header())
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("n/a");
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri().path(),
                        version = ?req.version(),
                        request_id = %rid,
                        status = Empty,
                        latency_ms = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<axum::body::Body>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("status", res.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                    },
                )
        });

        // 6. Echo the id back on the response
        router = router.layer(PropagateRequestIdLayer::new(x_request_id.clone()));

        // 7. Generate x-request-id when the client sent none
        router.layer(SetRequestIdLayer::new(
            x_request_id,
            middleware::request_id::MakeReqId,
        ))
    }

    /// Bind address and finalized router, or why serving cannot start.
    fn take_serving_parts(&self) -> Result<(SocketAddr, Router)> {
        let cfg = self.get_config();
        let addr: SocketAddr = cfg
            .bind_addr()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", cfg.bind_addr(), e))?;

        let router = self
            .final_router
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("serve called before rest_finalize"))?;
        Ok((addr, router))
    }
}

#[async_trait]
impl IngressHost for ApiIngress {
    fn rest_prepare(&self, router: Router) -> Result<Router> {
        tracing::debug!("REST host prepared base router with health check");
        Ok(router.route(HEALTH_PATH, get(web::health_check)))
    }

    fn reserved_paths(&self) -> Vec<String> {
        vec![
            HEALTH_PATH.to_string(),
            self.config.load().route_index_path.clone(),
        ]
    }

    fn rest_finalize(&self, router: Router) -> Result<Router> {
        let config = self.get_config();
        config.validate()?;

        let index = self.index.clone();
        let router = router.route(
            &config.route_index_path,
            get(move || {
                let doc = index.to_json();
                async move { ([(header::CACHE_CONTROL, "no-store")], Json(doc)).into_response() }
            }),
        );
        tracing::info!(
            path = %config.route_index_path,
            routes = self.index.len(),
            "Route index attached"
        );

        let router = self.apply_middleware_stack(router);
        *self.final_router.lock() = Some(router.clone());
        Ok(router)
    }

    async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let (addr, router) = self.take_serving_parts()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server bound on {}", addr);

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully (cancellation)");
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}
