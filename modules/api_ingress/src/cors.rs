use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

use crate::config::{ApiIngressConfig, CorsConfig};

/// CORS layer for `cfg`; `None` when CORS is disabled.
pub fn build_cors_layer(cfg: &ApiIngressConfig) -> Option<CorsLayer> {
    if !cfg.cors_enabled {
        return None;
    }
    Some(match &cfg.cors {
        Some(cors) => from_config(cors),
        None => CorsLayer::permissive(),
    })
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

fn from_config(cors: &CorsConfig) -> CorsLayer {
    let origins = if is_wildcard(&cors.allowed_origins) {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(parse_all(&cors.allowed_origins, "origin", |s| {
            HeaderValue::from_str(s).ok()
        }))
    };
    let methods = if is_wildcard(&cors.allowed_methods) {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(parse_all(&cors.allowed_methods, "method", |s| {
            Method::from_bytes(s.to_ascii_uppercase().as_bytes()).ok()
        }))
    };
    let headers = if is_wildcard(&cors.allowed_headers) {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(parse_all(&cors.allowed_headers, "header", |s| {
            HeaderName::from_bytes(s.as_bytes()).ok()
        }))
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers);
    // credentials cannot be combined with any wildcard
    let any_wildcard = [&cors.allowed_origins, &cors.allowed_methods, &cors.allowed_headers]
        .into_iter()
        .any(|values| is_wildcard(values));
    if cors.allow_credentials && any_wildcard {
        tracing::warn!("CORS allow_credentials ignored: origins, methods or headers use '*'");
    } else if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(max_age);
    }
    layer
}

/// Parse each entry, skipping (and logging) invalid ones.
fn parse_all<T>(values: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .filter_map(|raw| {
            let parsed = parse(raw);
            if parsed.is_none() {
                tracing::warn!(value = %raw, kind = what, "Ignoring invalid CORS entry");
            }
            parsed
        })
        .collect()
}
