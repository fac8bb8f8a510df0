//! Framework Adapters
//!
//! Adapters translate one framework's hook or middleware mechanism into
//! exactly two [`RequestInstrumentor`] calls per request: one when the
//! request is accepted, one when the response (or error) is finalized.
//!
//! Frameworks are abstracted as *capabilities*, not concrete types:
//!
//! - [`BlockingHost`] - can register paired before/after/teardown callbacks;
//!   one request is fully processed on one thread without suspension.
//! - [`MiddlewareHost`] - can accept an around-dispatch middleware; requests
//!   may suspend and resume cooperatively, so per-request state travels in
//!   continuation state, never thread-local storage.
//!
//! A new framework is supported by implementing the matching capability
//! trait on its application handle; the auto-detector (see [`crate::detect`])
//! needs no changes.
//!
//! [`RequestInstrumentor`]: crate::instrument::RequestInstrumentor

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::instrument::ResponseOutcome;

mod blocking;
mod task;

pub use blocking::BlockingAdapter;
pub use task::TaskAdapter;

// =============================================================================
// Request Head
// =============================================================================

/// The request attributes every adapter needs at entry time.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// HTTP method as reported by the framework
    pub method: String,
    /// Raw request path, before normalization
    pub path: String,
}

impl RequestHead {
    /// Convenience constructor.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

// =============================================================================
// Blocking Capability
// =============================================================================

/// Callback invoked when a blocking host accepts a request.
pub type BeforeRequestHook = Box<dyn Fn(&RequestHead) + Send + Sync>;

/// Callback invoked when a blocking host finalizes a response.
pub type AfterRequestHook = Box<dyn Fn(&ResponseOutcome) + Send + Sync>;

/// Callback invoked after the response left, or on the error path when no
/// response was produced. Always runs, even when the handler panicked.
pub type TeardownHook = Box<dyn Fn() + Send + Sync>;

/// Capability of synchronous hosts: paired before/after request callbacks
/// plus an always-runs teardown, each request handled on a single thread.
pub trait BlockingHost {
    /// Register a callback running before any application logic.
    fn register_before_request(&mut self, hook: BeforeRequestHook);

    /// Register a callback running when the response is finalized.
    fn register_after_request(&mut self, hook: AfterRequestHook);

    /// Register a callback that always runs once the request is torn down.
    fn register_teardown(&mut self, hook: TeardownHook);
}

// =============================================================================
// Middleware Capability
// =============================================================================

/// The downstream remainder of an asynchronous request dispatch.
pub type Next = BoxFuture<'static, ResponseOutcome>;

/// An around-dispatch middleware for asynchronous hosts.
#[async_trait]
pub trait TaskMiddleware: Send + Sync {
    /// Wrap one request dispatch. Implementations must uphold the start/end
    /// pairing even when the returned future is dropped before completion.
    async fn handle(&self, head: RequestHead, next: Next) -> ResponseOutcome;
}

/// Capability of asynchronous hosts: accept an around-dispatch middleware.
pub trait MiddlewareHost {
    /// Install a middleware wrapping every request dispatch.
    fn add_middleware(&mut self, middleware: Arc<dyn TaskMiddleware>);
}
