#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tidings::{EventContext, EventRouter, Handler, RouterConfig, json};

// ============================================================================
// Routers
// ============================================================================

/// A router that stays quiet about handler failures in test output.
pub fn quiet_router() -> EventRouter {
    EventRouter::with_config(RouterConfig::default().with_error_logging(false))
}

/// A router whose blocking dispatch gives up after `timeout`.
pub fn bounded_router(timeout: Duration) -> EventRouter {
    EventRouter::with_config(
        RouterConfig::default()
            .with_error_logging(false)
            .with_event_timeout(timeout),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Sync handler returning `value` as output.
pub fn returning(value: &'static str) -> Handler {
    Handler::new_sync(move |_| Ok(Some(json!(value))))
}

/// Async handler that bumps `counter` after a short sleep.
pub fn counting_async(counter: &Arc<AtomicUsize>) -> Handler {
    let counter = Arc::clone(counter);
    Handler::new_async(move |_| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
    })
}

/// Async handler that sleeps far longer than any test waits.
pub fn stalling_async() -> Handler {
    Handler::new_async(|_| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        })
    })
}

/// Reads the output of the context as a string.
pub fn output_str(ctx: &EventContext) -> Option<String> {
    ctx.output_as::<String>()
}
