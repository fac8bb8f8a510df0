//! Configuration for the instrumentation setup
//!
//! A single [`MetricsConfig`] struct drives everything: which port the
//! exposition endpoint binds (if any), the URL path it serves, whether route
//! templates are normalized, metric naming, histogram buckets, and the paths
//! excluded from instrumentation.

use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable overriding the exposition port
pub const ENV_PORT: &str = "AUTOSCALE_METRICS_PORT";
/// Environment variable overriding the metric namespace prefix
pub const ENV_NAMESPACE: &str = "AUTOSCALE_METRICS_NAMESPACE";
/// Environment variable providing the application name for the info metric
pub const ENV_APP_NAME: &str = "AUTOSCALE_METRICS_APP_NAME";
/// Environment variable providing the application version for the info metric
pub const ENV_APP_VERSION: &str = "AUTOSCALE_METRICS_APP_VERSION";

/// Default latency buckets, 5ms to 10s (optimized for web APIs)
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default response size buckets, 100B to 10MB
pub const DEFAULT_RESPONSE_SIZE_BUCKETS: &[f64] = &[
    100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0,
];

/// Configuration for the instrumentation setup
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// TCP port the exposition endpoint binds; `None` disables the endpoint
    pub port: Option<u16>,

    /// URL path serving the exposition text
    pub path: String,

    /// Collapse path parameters to placeholders (bounds label cardinality)
    pub route_normalization: bool,

    /// Metric name prefix (e.g. "myapp" -> "myapp_http_requests_total")
    pub namespace: String,

    /// Latency histogram bucket boundaries, in seconds
    pub latency_buckets: Vec<f64>,

    /// Response size histogram bucket boundaries, in bytes
    pub response_size_buckets: Vec<f64>,

    /// Request paths excluded from instrumentation (matched pre-normalization)
    pub exclude_paths: Vec<String>,

    /// Application name for the info metric (empty: omitted)
    pub app_name: String,

    /// Application version for the info metric (empty: omitted)
    pub app_version: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: Some(8000),
            path: "/metrics".to_string(),
            route_normalization: true,
            namespace: String::new(),
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
            response_size_buckets: DEFAULT_RESPONSE_SIZE_BUCKETS.to_vec(),
            exclude_paths: vec![
                "/health".to_string(),
                "/healthz".to_string(),
                "/metrics".to_string(),
                "/readiness".to_string(),
                "/liveness".to_string(),
            ],
            app_name: String::new(),
            app_version: String::new(),
        }
    }
}

impl MetricsConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Malformed values fall back to the default with a warning; reading the
    /// environment never fails.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // Factored out so tests can inject values without touching the
    // process-global environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PORT) {
            match raw.parse::<u16>() {
                Ok(port) => config.port = Some(port),
                Err(_) => warn!(value = %raw, "ignoring malformed {}", ENV_PORT),
            }
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        if let Some(name) = lookup(ENV_APP_NAME) {
            config.app_name = name;
        }
        if let Some(version) = lookup(ENV_APP_VERSION) {
            config.app_version = version;
        }

        config
    }

    /// Validate the configuration before any setup side effects happen.
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::Config(format!(
                "exposition path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::Config(
                "exposition path must not contain whitespace or control characters".to_string(),
            ));
        }
        if !self.namespace.is_empty()
            && !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "namespace '{}' must be alphanumeric or '_'",
                self.namespace
            )));
        }
        validate_buckets("latency_buckets", &self.latency_buckets)?;
        validate_buckets("response_size_buckets", &self.response_size_buckets)?;
        Ok(())
    }
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(Error::Config(format!("{} must not be empty", name)));
    }
    for window in buckets.windows(2) {
        if window[0] >= window[1] {
            return Err(Error::Config(format!(
                "{} must be strictly increasing (found {} before {})",
                name, window[0], window[1]
            )));
        }
    }
    if buckets[0] <= 0.0 || !buckets.iter().all(|b| b.is_finite()) {
        return Err(Error::Config(format!("{} must be positive and finite", name)));
    }
    Ok(())
}
