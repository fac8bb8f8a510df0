//! Metric Registry - "The Ledger"
//!
//! Owns every counter, gauge, and histogram the instrumentation produces and
//! renders them as Prometheus exposition text. Built on a private (non-global)
//! `prometheus::Registry` so tests and embedders can construct as many
//! independent instances as they need; one instance is expected to live for
//! the process lifetime.
//!
//! Every mutating operation is safe under arbitrary concurrent interleavings
//! and absorbs malformed input with a warning instead of failing: a bad call
//! site must never endanger the service being observed.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::{debug, warn};

use crate::config::MetricsConfig;
use crate::error::Result;

/// Longest accepted route label, in bytes
const MAX_ROUTE_LABEL_LEN: usize = 512;

/// Longest accepted method label, in bytes
const MAX_METHOD_LABEL_LEN: usize = 16;

// =============================================================================
// Status Class
// =============================================================================

/// Coarse bucket of an HTTP response status used as a metric label.
///
/// `Error` covers responses that never materialized (handler raised, request
/// cancelled) as well as statuses outside the 200..=599 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// 200-299
    Success,
    /// 300-399
    Redirect,
    /// 400-499
    ClientError,
    /// 500-599
    ServerError,
    /// No usable status
    Error,
}

impl StatusClass {
    /// Classify a numeric HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Error,
        }
    }

    /// Label value used in the exposition output.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Success => "2xx",
            Self::Redirect => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

// =============================================================================
// Metric Registry
// =============================================================================

/// Thread-safe store for request-level telemetry.
pub struct MetricRegistry {
    registry: Registry,
    request_count: IntCounterVec,
    request_latency: HistogramVec,
    in_flight: IntGaugeVec,
    response_size: HistogramVec,
    app_info: IntGaugeVec,
    started_at: Gauge,
    app_name: String,
    app_version: String,
    // Shared by mutators, exclusive for render(): a scrape sees no
    // half-applied request.
    snapshot: RwLock<()>,
}

impl MetricRegistry {
    /// Create a registry with all metric families registered.
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let ns = config.namespace.clone();

        let request_count = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests").namespace(ns.clone()),
            &["method", "route", "status_class"],
        )?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .namespace(ns.clone())
            .buckets(config.latency_buckets.clone()),
            &["method", "route"],
        )?;

        let in_flight = IntGaugeVec::new(
            Opts::new(
                "http_requests_in_flight",
                "Number of HTTP requests currently being processed",
            )
            .namespace(ns.clone()),
            &["route"],
        )?;

        let response_size = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "HTTP response size in bytes")
                .namespace(ns.clone())
                .buckets(config.response_size_buckets.clone()),
            &["method", "route"],
        )?;

        let app_info = IntGaugeVec::new(
            Opts::new("app_info", "Application information").namespace(ns.clone()),
            &["name", "version"],
        )?;

        let started_at = Gauge::with_opts(
            Opts::new(
                "app_started_timestamp_seconds",
                "Unix timestamp when the application started",
            )
            .namespace(ns),
        )?;

        let registry = Registry::new();
        registry.register(Box::new(request_count.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(response_size.clone()))?;
        registry.register(Box::new(app_info.clone()))?;
        registry.register(Box::new(started_at.clone()))?;

        started_at.set(unix_now());

        debug!(
            namespace = %config.namespace,
            buckets = config.latency_buckets.len(),
            "metric registry initialized"
        );

        let registry = Self {
            registry,
            request_count,
            request_latency,
            in_flight,
            response_size,
            app_info,
            started_at,
            app_name: config.app_name.clone(),
            app_version: config.app_version.clone(),
            snapshot: RwLock::new(()),
        };
        registry.apply_app_info();
        Ok(registry)
    }

    /// Publish the configured name/version series, if any was configured.
    fn apply_app_info(&self) {
        if !self.app_name.is_empty() || !self.app_version.is_empty() {
            self.app_info
                .with_label_values(&[self.app_name.as_str(), self.app_version.as_str()])
                .set(1);
        }
    }

    /// Increment the request counter for a (method, route, status_class)
    /// combination, creating it on first use.
    ///
    /// Malformed labels are dropped with a warning.
    pub fn increment_count(&self, method: &str, route: &str, status_class: StatusClass) {
        if !valid_method(method) || !valid_route(route) {
            warn!(method, route, "dropping count increment with malformed labels");
            return;
        }
        let _shared = self.snapshot.read();
        self.request_count
            .with_label_values(&[method, route, status_class.as_label()])
            .inc();
    }

    /// Record a request latency observation, in seconds.
    ///
    /// Negative or non-finite values (clock skew) are clamped to zero rather
    /// than rejected; the hot path never fails.
    pub fn observe_latency(&self, method: &str, route: &str, seconds: f64) {
        if !valid_method(method) || !valid_route(route) {
            warn!(method, route, "dropping latency observation with malformed labels");
            return;
        }
        let seconds = if seconds.is_finite() && seconds >= 0.0 {
            seconds
        } else {
            warn!(method, route, seconds, "clamping anomalous latency to zero");
            0.0
        };
        let _shared = self.snapshot.read();
        self.request_latency
            .with_label_values(&[method, route])
            .observe(seconds);
    }

    /// Record a response body size observation, in bytes.
    pub fn observe_response_size(&self, method: &str, route: &str, bytes: f64) {
        if !valid_method(method) || !valid_route(route) {
            warn!(method, route, "dropping size observation with malformed labels");
            return;
        }
        if !bytes.is_finite() || bytes < 0.0 {
            warn!(method, route, bytes, "dropping anomalous response size");
            return;
        }
        let _shared = self.snapshot.read();
        self.response_size
            .with_label_values(&[method, route])
            .observe(bytes);
    }

    /// Apply a +1/-1 delta to the in-flight gauge for a route.
    ///
    /// Deltas other than +1/-1 are refused. A decrement observed at or below
    /// zero is refused too, but that check is best-effort only: it reads and
    /// then adds under the shared lock, so two racing unpaired decrements can
    /// still cross zero. Callers are expected to pair their deltas per
    /// request (an unpaired decrement is an instrumentation bug upstream),
    /// and paired deltas keep the gauge non-negative unconditionally.
    pub fn set_in_flight_delta(&self, route: &str, delta: i64) {
        if delta != 1 && delta != -1 {
            warn!(route, delta, "refusing in-flight delta outside {{+1, -1}}");
            return;
        }
        if !valid_route(route) {
            warn!(route, "dropping in-flight delta with malformed route");
            return;
        }
        let _shared = self.snapshot.read();
        let gauge = match self.in_flight.get_metric_with_label_values(&[route]) {
            Ok(gauge) => gauge,
            Err(e) => {
                warn!(route, error = %e, "in-flight gauge lookup failed");
                return;
            }
        };
        if delta < 0 && gauge.get() <= 0 {
            warn!(route, "refusing in-flight decrement below zero");
            return;
        }
        gauge.add(delta);
    }

    /// Render the full exposition snapshot as Prometheus text.
    ///
    /// Takes a consistent snapshot: concurrent writers are excluded for the
    /// bounded duration of gather+encode, so a completing request is either
    /// fully visible or not at all. Series within each family are sorted by
    /// label values for deterministic scrape output.
    pub fn render(&self) -> String {
        let _exclusive = self.snapshot.write();
        let mut families = self.registry.gather();
        for family in &mut families {
            family.mut_metric().as_mut_slice().sort_by(|a, b| {
                let ka: Vec<(&str, &str)> = a
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name(), l.get_value()))
                    .collect();
                let kb: Vec<(&str, &str)> = b
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name(), l.get_value()))
                    .collect();
                ka.cmp(&kb)
            });
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            warn!(error = %e, "exposition encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Content type of the rendered exposition text.
    pub fn format_type(&self) -> &'static str {
        "text/plain; version=0.0.4"
    }

    /// Zero every metric family. Intended for tests only; production
    /// registries live untouched for the process lifetime.
    pub fn reset(&self) {
        let _exclusive = self.snapshot.write();
        self.request_count.reset();
        self.request_latency.reset();
        self.in_flight.reset();
        self.response_size.reset();
        self.app_info.reset();
        self.apply_app_info();
        self.started_at.set(unix_now());
    }

    /// Current counter value for a label combination (0 if never observed).
    pub fn count_for(&self, method: &str, route: &str, status_class: StatusClass) -> u64 {
        self.request_count
            .get_metric_with_label_values(&[method, route, status_class.as_label()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Current in-flight gauge value for a route (0 if never observed).
    pub fn in_flight_for(&self, route: &str) -> i64 {
        self.in_flight
            .get_metric_with_label_values(&[route])
            .map(|g| g.get())
            .unwrap_or(0)
    }

    /// Number of latency observations recorded for a label pair.
    pub fn latency_samples(&self, method: &str, route: &str) -> u64 {
        self.request_latency
            .get_metric_with_label_values(&[method, route])
            .map(|h| h.get_sample_count())
            .unwrap_or(0)
    }

    /// Number of response-size observations recorded for a label pair.
    pub fn response_size_samples(&self, method: &str, route: &str) -> u64 {
        self.response_size
            .get_metric_with_label_values(&[method, route])
            .map(|h| h.get_sample_count())
            .unwrap_or(0)
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry").finish_non_exhaustive()
    }
}

// =============================================================================
// Label Validation
// =============================================================================

// RFC 9110 token characters, so extension methods like M-SEARCH pass.
fn valid_method(method: &str) -> bool {
    !method.is_empty()
        && method.len() <= MAX_METHOD_LABEL_LEN
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn valid_route(route: &str) -> bool {
    route.starts_with('/')
        && route.len() <= MAX_ROUTE_LABEL_LEN
        && !route.chars().any(|c| c.is_control() || c.is_whitespace())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
