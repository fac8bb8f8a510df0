//! autoscale-metrics - Request Telemetry for Autoscaling Decision Systems
//!
//! Instruments HTTP-serving applications with the request-level telemetry an
//! external autoscaling decision process consumes: request counts, latency
//! histograms, and in-flight concurrency, keyed by route template and
//! outcome, exposed in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌──────────────┐
//! │   Adapter    │───▶│  Instrumentor  │───▶│   Registry   │
//! │  (hooks in)  │    │ (state machine)│    │  (families)  │
//! └──────────────┘    └────────────────┘    └──────────────┘
//!        ▲                                          │
//!   AutoDetector                              Exposition
//!   (setup time)                              (/metrics)
//! ```
//!
//! Setup probes the application handle for a supported hook capability,
//! binds the matching adapter, and (optionally) spawns the scrape endpoint.
//! From then on every request is accounted exactly once, including requests
//! that raise, time out, or are cancelled mid-flight.
//!
//! # Usage
//!
//! ```ignore
//! use autoscale_metrics::{enable_metrics, MetricsConfig};
//!
//! let mut app = my_framework_app();
//! let instrumentation = enable_metrics(&mut app, MetricsConfig::default())?;
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Framework adapters and the capability traits they bind to
//! - [`config`] - Setup configuration and environment overrides
//! - [`detect`] - Adapter auto-detection over application handles
//! - [`error`] - Error types
//! - [`exposition`] - Prometheus text exposition endpoint
//! - [`instrument`] - Request lifecycle state machine
//! - [`normalize`] - Route template normalization
//! - [`registry`] - The metric registry

pub mod adapters;
pub mod config;
pub mod detect;
pub mod error;
pub mod exposition;
pub mod instrument;
pub mod normalize;
pub mod registry;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::error;

// Re-export commonly used types
pub use adapters::{BlockingHost, MiddlewareHost, RequestHead, TaskMiddleware};
pub use config::MetricsConfig;
pub use detect::HostApplication;
pub use error::{Error, Result};
pub use instrument::{RequestInstrumentor, ResponseOutcome};
pub use registry::{MetricRegistry, StatusClass};

/// Live instrumentation for one application: the registry it feeds, the
/// adapter that was bound, and the exposition task if one was spawned.
pub struct Instrumentation {
    registry: Arc<MetricRegistry>,
    adapter: &'static str,
    exposition: Option<tokio::task::JoinHandle<()>>,
}

impl Instrumentation {
    /// The registry backing this instrumentation.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Name of the adapter the auto-detector selected.
    pub fn adapter_name(&self) -> &'static str {
        self.adapter
    }

    /// Render the current exposition snapshot.
    pub fn render(&self) -> String {
        self.registry.render()
    }

    /// Stop the exposition endpoint, if one was spawned. The registry and
    /// the bound hooks keep working; only the scrape endpoint goes away.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.exposition.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("adapter", &self.adapter)
            .field("exposition", &self.exposition.is_some())
            .finish()
    }
}

/// Auto-detect the application's framework and enable metrics for it.
///
/// Validates `config`, builds a fresh [`MetricRegistry`] and
/// [`RequestInstrumentor`], binds the first matching adapter, and spawns the
/// exposition endpoint when `config.port` is set (this requires running
/// inside a tokio runtime; pass `port: None` for a runtime-free setup).
///
/// Fails with a configuration error when no adapter matches, when the handle
/// was already instrumented, or when `config` is invalid. Setup failures
/// leave the application untouched.
pub fn enable_metrics(
    app: &mut dyn HostApplication,
    config: MetricsConfig,
) -> Result<Instrumentation> {
    config.validate()?;

    let runtime = match config.port {
        Some(_) => Some(tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config(
                "an exposition port is configured but no tokio runtime is running; \
                 use port: None or call from async context"
                    .to_string(),
            )
        })?),
        None => None,
    };

    let registry = Arc::new(MetricRegistry::new(&config)?);
    let instrumentor = Arc::new(RequestInstrumentor::new(Arc::clone(&registry), &config));
    let adapter = detect::attach(app, instrumentor)?;

    let exposition = match (config.port, runtime) {
        (Some(port), Some(runtime)) => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let path = config.path.clone();
            let registry = Arc::clone(&registry);
            Some(runtime.spawn(async move {
                if let Err(e) = exposition::serve(registry, addr, path).await {
                    error!("metrics endpoint error: {}", e);
                }
            }))
        }
        _ => None,
    };

    Ok(Instrumentation {
        registry,
        adapter,
        exposition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AfterRequestHook, BeforeRequestHook, TeardownHook};
    use assert_matches::assert_matches;

    #[derive(Default)]
    struct BlockingApp {
        before: Option<BeforeRequestHook>,
        after: Option<AfterRequestHook>,
        teardown: Option<TeardownHook>,
        instrumented: bool,
    }

    impl BlockingHost for BlockingApp {
        fn register_before_request(&mut self, hook: BeforeRequestHook) {
            self.before = Some(hook);
        }
        fn register_after_request(&mut self, hook: AfterRequestHook) {
            self.after = Some(hook);
        }
        fn register_teardown(&mut self, hook: TeardownHook) {
            self.teardown = Some(hook);
        }
    }

    impl HostApplication for BlockingApp {
        fn name(&self) -> &str {
            "test-app"
        }
        fn as_blocking_host(&mut self) -> Option<&mut dyn BlockingHost> {
            Some(self)
        }
        fn is_instrumented(&self) -> bool {
            self.instrumented
        }
        fn mark_instrumented(&mut self) {
            self.instrumented = true;
        }
    }

    fn no_port() -> MetricsConfig {
        MetricsConfig {
            port: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_enable_metrics_binds_and_reports_adapter() {
        let mut app = BlockingApp::default();
        let instrumentation = enable_metrics(&mut app, no_port()).unwrap();

        assert_eq!(instrumentation.adapter_name(), "blocking");
        assert!(app.before.is_some());
        assert!(app.after.is_some());
        assert!(app.teardown.is_some());
    }

    #[test]
    fn test_enable_metrics_twice_fails() {
        let mut app = BlockingApp::default();
        enable_metrics(&mut app, no_port()).unwrap();
        assert_matches!(
            enable_metrics(&mut app, no_port()),
            Err(Error::AlreadyInstrumented(_))
        );
    }

    #[test]
    fn test_invalid_config_fails_before_binding() {
        let mut app = BlockingApp::default();
        let config = MetricsConfig {
            port: None,
            path: "metrics".to_string(),
            ..Default::default()
        };
        assert_matches!(enable_metrics(&mut app, config), Err(Error::Config(_)));
        // Setup failure left the handle untouched.
        assert!(!app.is_instrumented());
        assert!(app.before.is_none());
    }

    #[test]
    fn test_port_without_runtime_fails() {
        let mut app = BlockingApp::default();
        let config = MetricsConfig {
            port: Some(0),
            ..Default::default()
        };
        assert_matches!(enable_metrics(&mut app, config), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_port_with_runtime_spawns_endpoint() {
        let mut app = BlockingApp::default();
        let config = MetricsConfig {
            port: Some(0), // ephemeral, never collides
            ..Default::default()
        };
        let mut instrumentation = enable_metrics(&mut app, config).unwrap();
        assert!(instrumentation.exposition.is_some());
        instrumentation.shutdown();
    }

    #[test]
    fn test_end_to_end_through_hooks() {
        let mut app = BlockingApp::default();
        let instrumentation = enable_metrics(&mut app, no_port()).unwrap();

        (app.before.as_ref().unwrap())(&RequestHead::new("GET", "/users/42"));
        (app.after.as_ref().unwrap())(&ResponseOutcome::status(200));
        (app.teardown.as_ref().unwrap())();

        let text = instrumentation.render();
        assert!(text.contains(
            "http_requests_total{method=\"GET\",route=\"/users/{id}\",status_class=\"2xx\"} 1"
        ));
        assert!(text.contains("http_requests_in_flight{route=\"/users/{id}\"} 0"));
    }
}
