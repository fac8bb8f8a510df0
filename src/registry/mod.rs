//! Metric registry
//!
//! Process-lifetime store for request counters, latency histograms, and
//! in-flight gauges, rendered on demand in the Prometheus text exposition
//! format.

mod store;

pub use store::{MetricRegistry, StatusClass};
