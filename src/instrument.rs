//! Request lifecycle instrumentation
//!
//! Framework-agnostic state machine driving the [`MetricRegistry`]: every
//! request moves `PENDING -> IN_FLIGHT -> COMPLETED`, with exactly one count
//! increment, one latency observation, and a paired in-flight inc/dec no
//! matter how the request ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::config::MetricsConfig;
use crate::normalize::normalize_route;
use crate::registry::{MetricRegistry, StatusClass};

// =============================================================================
// Request Context
// =============================================================================

/// Ephemeral per-request state, created by [`RequestInstrumentor::on_request_start`].
///
/// Carried through the framework's request-scoped storage (a thread-local
/// slot for blocking hosts, continuation state for async hosts); never shared
/// across requests. The completion flag makes
/// [`RequestInstrumentor::on_request_end`] idempotent.
#[derive(Debug)]
pub struct RequestContext {
    method: String,
    route: String,
    started_at: Instant,
    completed: AtomicBool,
}

impl RequestContext {
    fn new(method: String, route: String) -> Self {
        Self {
            method,
            route,
            started_at: Instant::now(),
            completed: AtomicBool::new(false),
        }
    }

    /// Uppercased HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Normalized route template this request was filed under.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Whether `on_request_end` already ran for this context.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Response Outcome
// =============================================================================

/// How a request finished, as reported by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// A response was produced.
    Completed {
        /// HTTP status code
        status: u16,
        /// Response body size, when the framework exposes it
        body_bytes: Option<u64>,
    },
    /// The request never produced a response: handler raised, connection
    /// dropped, or the future was cancelled.
    Aborted,
}

impl ResponseOutcome {
    /// Shorthand for a completed response without a known body size.
    pub fn status(status: u16) -> Self {
        Self::Completed {
            status,
            body_bytes: None,
        }
    }

    /// Status class bucket for this outcome.
    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::Completed { status, .. } => StatusClass::from_status(*status),
            Self::Aborted => StatusClass::Error,
        }
    }
}

// =============================================================================
// Request Instrumentor
// =============================================================================

/// Drives registry updates at the two lifecycle points every adapter hits.
pub struct RequestInstrumentor {
    registry: Arc<MetricRegistry>,
    route_normalization: bool,
    exclude_paths: Vec<String>,
}

impl RequestInstrumentor {
    /// Build an instrumentor over a registry.
    pub fn new(registry: Arc<MetricRegistry>, config: &MetricsConfig) -> Self {
        Self {
            registry,
            route_normalization: config.route_normalization,
            exclude_paths: config.exclude_paths.clone(),
        }
    }

    /// The registry this instrumentor feeds.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// `PENDING -> IN_FLIGHT`: record the start instant, normalize the route,
    /// and increment the in-flight gauge.
    ///
    /// Returns `None` for excluded paths (health checks, the exposition
    /// endpoint itself); excluded requests produce no series at all.
    pub fn on_request_start(&self, method: &str, path: &str) -> Option<Arc<RequestContext>> {
        if self.exclude_paths.iter().any(|p| p == path) {
            return None;
        }

        let route = if self.route_normalization {
            normalize_route(path)
        } else {
            path.to_string()
        };
        let ctx = Arc::new(RequestContext::new(method.to_ascii_uppercase(), route));
        self.registry.set_in_flight_delta(ctx.route(), 1);
        Some(ctx)
    }

    /// `IN_FLIGHT -> COMPLETED`: classify the outcome and update every family
    /// exactly once.
    ///
    /// Safe to call more than once for the same context: only the first call
    /// updates counters, later calls are warn-and-no-op. This protects the
    /// in-flight gauge from double decrements when an adapter's teardown path
    /// overlaps its response path.
    pub fn on_request_end(&self, ctx: &RequestContext, outcome: &ResponseOutcome) {
        if ctx.completed.swap(true, Ordering::AcqRel) {
            warn!(
                method = ctx.method(),
                route = ctx.route(),
                "ignoring duplicate completion for request context"
            );
            return;
        }

        let elapsed = ctx.started_at.elapsed().as_secs_f64();
        let class = outcome.status_class();

        self.registry
            .increment_count(ctx.method(), ctx.route(), class);
        self.registry
            .observe_latency(ctx.method(), ctx.route(), elapsed);
        if let ResponseOutcome::Completed {
            body_bytes: Some(bytes),
            ..
        } = outcome
        {
            self.registry
                .observe_response_size(ctx.method(), ctx.route(), *bytes as f64);
        }
        self.registry.set_in_flight_delta(ctx.route(), -1);
    }
}

impl std::fmt::Debug for RequestInstrumentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInstrumentor")
            .field("route_normalization", &self.route_normalization)
            .field("exclude_paths", &self.exclude_paths)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrumentor() -> RequestInstrumentor {
        let config = MetricsConfig {
            port: None,
            ..Default::default()
        };
        let registry = Arc::new(MetricRegistry::new(&config).unwrap());
        RequestInstrumentor::new(registry, &config)
    }

    #[test]
    fn test_start_end_happy_path() {
        let ins = instrumentor();

        let ctx = ins.on_request_start("get", "/users/42").unwrap();
        assert_eq!(ctx.method(), "GET");
        assert_eq!(ctx.route(), "/users/{id}");
        assert_eq!(ins.registry().in_flight_for("/users/{id}"), 1);
        assert!(!ctx.is_completed());

        ins.on_request_end(&ctx, &ResponseOutcome::status(200));
        assert!(ctx.is_completed());
        assert_eq!(
            ins.registry().count_for("GET", "/users/{id}", StatusClass::Success),
            1
        );
        assert_eq!(ins.registry().latency_samples("GET", "/users/{id}"), 1);
        assert_eq!(ins.registry().in_flight_for("/users/{id}"), 0);
    }

    #[test]
    fn test_double_completion_is_noop() {
        let ins = instrumentor();
        let ctx = ins.on_request_start("GET", "/users/42").unwrap();

        ins.on_request_end(&ctx, &ResponseOutcome::status(200));
        ins.on_request_end(&ctx, &ResponseOutcome::status(500));

        assert_eq!(
            ins.registry().count_for("GET", "/users/{id}", StatusClass::Success),
            1
        );
        assert_eq!(
            ins.registry().count_for("GET", "/users/{id}", StatusClass::ServerError),
            0
        );
        assert_eq!(ins.registry().latency_samples("GET", "/users/{id}"), 1);
        assert_eq!(ins.registry().in_flight_for("/users/{id}"), 0);
    }

    #[test]
    fn test_aborted_outcome_counts_as_error() {
        let ins = instrumentor();
        let ctx = ins.on_request_start("POST", "/orders").unwrap();

        ins.on_request_end(&ctx, &ResponseOutcome::Aborted);

        assert_eq!(
            ins.registry().count_for("POST", "/orders", StatusClass::Error),
            1
        );
        assert_eq!(ins.registry().in_flight_for("/orders"), 0);
    }

    #[test]
    fn test_excluded_paths_produce_no_series() {
        let ins = instrumentor();
        assert!(ins.on_request_start("GET", "/health").is_none());
        assert!(ins.on_request_start("GET", "/metrics").is_none());

        assert_eq!(ins.registry().in_flight_for("/health"), 0);
        assert!(!ins.registry().render().contains("/health"));
    }

    #[test]
    fn test_exclusion_matches_raw_path_not_template() {
        let config = MetricsConfig {
            port: None,
            exclude_paths: vec!["/users/7".to_string()],
            ..Default::default()
        };
        let registry = Arc::new(MetricRegistry::new(&config).unwrap());
        let ins = RequestInstrumentor::new(registry, &config);

        assert!(ins.on_request_start("GET", "/users/7").is_none());
        // Other ids on the same template are still instrumented.
        assert!(ins.on_request_start("GET", "/users/8").is_some());
    }

    #[test]
    fn test_normalization_can_be_disabled() {
        let config = MetricsConfig {
            port: None,
            route_normalization: false,
            ..Default::default()
        };
        let registry = Arc::new(MetricRegistry::new(&config).unwrap());
        let ins = RequestInstrumentor::new(registry, &config);

        let ctx = ins.on_request_start("GET", "/users/42").unwrap();
        assert_eq!(ctx.route(), "/users/42");
    }

    #[test]
    fn test_body_bytes_feed_response_size_histogram() {
        let ins = instrumentor();

        let ctx = ins.on_request_start("GET", "/users/42").unwrap();
        ins.on_request_end(
            &ctx,
            &ResponseOutcome::Completed {
                status: 200,
                body_bytes: Some(2048),
            },
        );
        let ctx = ins.on_request_start("GET", "/users/43").unwrap();
        ins.on_request_end(&ctx, &ResponseOutcome::status(200));

        assert_eq!(ins.registry().response_size_samples("GET", "/users/{id}"), 1);
    }

    #[test]
    fn test_outcome_status_classes() {
        assert_eq!(ResponseOutcome::status(200).status_class(), StatusClass::Success);
        assert_eq!(ResponseOutcome::status(302).status_class(), StatusClass::Redirect);
        assert_eq!(ResponseOutcome::status(404).status_class(), StatusClass::ClientError);
        assert_eq!(ResponseOutcome::status(503).status_class(), StatusClass::ServerError);
        assert_eq!(ResponseOutcome::Aborted.status_class(), StatusClass::Error);
    }

    #[test]
    fn test_concurrent_start_end_pairs_leave_gauge_at_zero() {
        let config = MetricsConfig {
            port: None,
            ..Default::default()
        };
        let registry = Arc::new(MetricRegistry::new(&config).unwrap());
        let ins = Arc::new(RequestInstrumentor::new(registry, &config));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let ins = Arc::clone(&ins);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let ctx = ins
                            .on_request_start("GET", &format!("/users/{}", worker * 1000 + i))
                            .unwrap();
                        ins.on_request_end(&ctx, &ResponseOutcome::status(200));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            ins.registry().count_for("GET", "/users/{id}", StatusClass::Success),
            1600
        );
        assert_eq!(ins.registry().in_flight_for("/users/{id}"), 0);
    }
}
