//! Task (asynchronous) framework adapter
//!
//! Binds the instrumentor to hosts that accept an around-dispatch middleware.
//! An async host may suspend a request and interleave many logical requests
//! on one thread, so the request context travels inside the middleware
//! future itself: an RAII guard owns it, and dropping the future before the
//! response arrives (cancellation, timeout upstream) completes the request
//! as `Aborted` from the guard's destructor. In-flight increments are
//! therefore always paired, whatever the executor does.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::{MiddlewareHost, Next, RequestHead, TaskMiddleware};
use crate::instrument::{RequestContext, RequestInstrumentor, ResponseOutcome};

/// Adapter for [`MiddlewareHost`]-capable applications.
pub struct TaskAdapter {
    instrumentor: Arc<RequestInstrumentor>,
}

impl TaskAdapter {
    /// Adapter name reported by the auto-detector.
    pub const NAME: &'static str = "task";

    /// Install the adapter as a middleware on the host.
    pub fn bind(host: &mut dyn MiddlewareHost, instrumentor: Arc<RequestInstrumentor>) {
        host.add_middleware(Arc::new(Self { instrumentor }));
        debug!("task adapter bound");
    }
}

#[async_trait]
impl TaskMiddleware for TaskAdapter {
    async fn handle(&self, head: RequestHead, next: Next) -> ResponseOutcome {
        let Some(ctx) = self.instrumentor.on_request_start(&head.method, &head.path) else {
            // Excluded path: dispatch untouched.
            return next.await;
        };

        let guard = CompletionGuard {
            instrumentor: Arc::clone(&self.instrumentor),
            ctx: Some(ctx),
        };
        let outcome = next.await;
        guard.finish(&outcome);
        outcome
    }
}

/// Completes the request exactly once: explicitly with the real outcome, or
/// from `Drop` as `Aborted` when the dispatch future is cancelled.
struct CompletionGuard {
    instrumentor: Arc<RequestInstrumentor>,
    ctx: Option<Arc<RequestContext>>,
}

impl CompletionGuard {
    fn finish(mut self, outcome: &ResponseOutcome) {
        if let Some(ctx) = self.ctx.take() {
            self.instrumentor.on_request_end(&ctx, outcome);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.instrumentor.on_request_end(&ctx, &ResponseOutcome::Aborted);
        }
    }
}
