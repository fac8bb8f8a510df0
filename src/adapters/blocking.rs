//! Blocking (synchronous) framework adapter
//!
//! Binds the instrumentor to hosts exposing paired before/after/teardown
//! callbacks. A blocking host processes each request fully on one thread, so
//! the request context lives in a thread-local slot between the before and
//! after hooks.
//!
//! Pairing guarantee: the after hook completes the request with its real
//! outcome; the teardown hook completes it with `Aborted` if the after hook
//! never ran (handler panic, framework error path). The context's completion
//! flag makes the overlap harmless when both run.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use crate::adapters::{BlockingHost, RequestHead};
use crate::instrument::{RequestContext, RequestInstrumentor, ResponseOutcome};

thread_local! {
    // One slot per thread: blocking hosts never interleave two requests on
    // the same thread.
    static ACTIVE_REQUEST: RefCell<Option<Arc<RequestContext>>> = const { RefCell::new(None) };
}

/// Adapter for [`BlockingHost`]-capable applications.
pub struct BlockingAdapter;

impl BlockingAdapter {
    /// Adapter name reported by the auto-detector.
    pub const NAME: &'static str = "blocking";

    /// Register lifecycle hooks on the host, wiring them to the instrumentor.
    pub fn bind(host: &mut dyn BlockingHost, instrumentor: Arc<RequestInstrumentor>) {
        let on_start = Arc::clone(&instrumentor);
        host.register_before_request(Box::new(move |head: &RequestHead| {
            let ctx = on_start.on_request_start(&head.method, &head.path);
            ACTIVE_REQUEST.with(|slot| *slot.borrow_mut() = ctx);
        }));

        let on_end = Arc::clone(&instrumentor);
        host.register_after_request(Box::new(move |outcome: &ResponseOutcome| {
            if let Some(ctx) = ACTIVE_REQUEST.with(|slot| slot.borrow_mut().take()) {
                on_end.on_request_end(&ctx, outcome);
            }
        }));

        let on_teardown = instrumentor;
        host.register_teardown(Box::new(move || {
            // Still occupied means the after hook never ran.
            if let Some(ctx) = ACTIVE_REQUEST.with(|slot| slot.borrow_mut().take()) {
                on_teardown.on_request_end(&ctx, &ResponseOutcome::Aborted);
            }
        }));

        debug!("blocking adapter bound");
    }
}
