//! Adapter auto-detection
//!
//! Given an opaque application handle, probe it against an ordered list of
//! [`AdapterDescriptor`]s (most specific first) and bind the first adapter
//! whose capability the handle exposes. Probing is deterministic: the same
//! capability set always selects the same adapter, and a failed detection
//! registers no hooks.

use std::sync::Arc;

use tracing::info;

use crate::adapters::{BlockingAdapter, BlockingHost, MiddlewareHost, TaskAdapter};
use crate::error::{Error, Result};
use crate::instrument::RequestInstrumentor;

// =============================================================================
// Host Application
// =============================================================================

/// An instrumentable application handle.
///
/// Implementors override the capability accessors for the hook mechanisms
/// they actually support; the defaults claim nothing. The instrumented flag
/// guards against double-counting when setup is attempted twice on the same
/// handle, and is owned by the handle itself so separate setups agree.
pub trait HostApplication {
    /// Human-readable application name, used in errors and logs.
    fn name(&self) -> &str;

    /// Blocking before/after-hook capability, if the application has one.
    fn as_blocking_host(&mut self) -> Option<&mut dyn BlockingHost> {
        None
    }

    /// Around-dispatch middleware capability, if the application has one.
    fn as_middleware_host(&mut self) -> Option<&mut dyn MiddlewareHost> {
        None
    }

    /// Whether hooks were already registered on this handle.
    fn is_instrumented(&self) -> bool;

    /// Record that hooks are now registered.
    fn mark_instrumented(&mut self);
}

// =============================================================================
// Adapter Descriptors
// =============================================================================

/// Static metadata describing one adapter: which capability it claims and
/// how to bind it. Consulted only during detection, not retained.
pub struct AdapterDescriptor {
    /// Adapter name returned on a successful bind
    pub name: &'static str,
    probe: fn(&mut dyn HostApplication) -> bool,
    bind: fn(&mut dyn HostApplication, Arc<RequestInstrumentor>),
}

/// Ordered most specific first: the blocking hook pair is a narrower claim
/// than accepting a generic middleware, and probing it first keeps the
/// choice stable for handles exposing both.
const DESCRIPTORS: &[AdapterDescriptor] = &[
    AdapterDescriptor {
        name: BlockingAdapter::NAME,
        probe: |app| app.as_blocking_host().is_some(),
        bind: |app, instrumentor| {
            if let Some(host) = app.as_blocking_host() {
                BlockingAdapter::bind(host, instrumentor);
            }
        },
    },
    AdapterDescriptor {
        name: TaskAdapter::NAME,
        probe: |app| app.as_middleware_host().is_some(),
        bind: |app, instrumentor| {
            if let Some(host) = app.as_middleware_host() {
                TaskAdapter::bind(host, instrumentor);
            }
        },
    },
];

/// The descriptor table, in probe order.
pub fn descriptors() -> &'static [AdapterDescriptor] {
    DESCRIPTORS
}

/// Select and bind the first matching adapter for an application handle.
///
/// Returns the bound adapter's name. Fails without side effects when the
/// handle is already instrumented or no descriptor matches.
pub fn attach(
    app: &mut dyn HostApplication,
    instrumentor: Arc<RequestInstrumentor>,
) -> Result<&'static str> {
    if app.is_instrumented() {
        return Err(Error::AlreadyInstrumented(app.name().to_string()));
    }

    for descriptor in DESCRIPTORS {
        if (descriptor.probe)(app) {
            (descriptor.bind)(app, instrumentor);
            app.mark_instrumented();
            info!(app = app.name(), adapter = descriptor.name, "instrumentation attached");
            return Ok(descriptor.name);
        }
    }

    Err(Error::UnsupportedApplication(app.name().to_string()))
}
