use std::time::Duration;

use serde::{Deserialize, Serialize};

/// API ingress configuration, read from `modules.api_ingress.config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiIngressConfig {
    /// `host:port`; derived from the `server` section when unset.
    pub bind_addr: Option<String>,
    /// Enable CORS; `cors` narrows it, permissive otherwise.
    pub cors_enabled: bool,
    pub cors: Option<CorsConfig>,
    pub body_limit_bytes: usize,
    /// Handler deadline; requests taking longer get `408`.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Where the JSON route index is served.
    pub route_index_path: String,
}

impl Default for ApiIngressConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            cors_enabled: false,
            cors: None,
            body_limit_bytes: 16 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            route_index_path: "/_routes".to_string(),
        }
    }
}

impl ApiIngressConfig {
    /// Fill `bind_addr` from the server section unless configured explicitly.
    pub fn with_default_bind(mut self, host: &str, port: u16) -> Self {
        if self.bind_addr.is_none() {
            self.bind_addr = Some(format!("{host}:{port}"));
        }
        self
    }

    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or("127.0.0.1:8087")
    }

    /// `route_index_path` must be one literal segment (`/_routes`), so the
    /// only route that can collide with it is a mount at the same path,
    /// which the host reserves.
    pub fn validate(&self) -> anyhow::Result<()> {
        let path = &self.route_index_path;
        let Some(segment) = path.strip_prefix('/') else {
            anyhow::bail!("route_index_path '{path}' must start with '/'");
        };
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
        {
            anyhow::bail!(
                "route_index_path '{path}' must be a single segment of [A-Za-z0-9-_.~]"
            );
        }
        if path == crate::HEALTH_PATH {
            anyhow::bail!("route_index_path '{path}' is taken by the health check");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// `["*"]` allows any origin.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: vec!["*".to_string()],
            allow_credentials: false,
            max_age: Some(Duration::from_secs(600)),
        }
    }
}
