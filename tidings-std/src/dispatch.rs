//! Handler-chain execution.
//!
//! The same loop runs in three modes:
//!
//! - [`run_inline`]: sync handlers on the calling thread, async handlers skipped
//! - [`run_suspending`]: sync handlers inline, async handlers awaited
//! - [`run_bridged`]: sync handlers inline, async handlers shipped to the
//!   background loop while the calling thread blocks on the result
//!
//! In every mode a handler failure is recorded on the context and the chain
//! continues, while the chain-stop signal or a set stop flag ends it.

use crate::{bridge::BackgroundLoop, registry::ResolvedHandler};
use std::{
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};
use tidings_core::{DispatchError, EventContext, HandlerError, HandlerFailure, HandlerResult};

/// Logging switches threaded through one dispatch.
#[derive(Clone, Debug)]
pub(crate) struct ChainOptions {
    pub(crate) router: Arc<str>,
    pub(crate) log_errors: bool,
    pub(crate) trace: bool,
}

/// Result of handing one handler's outcome to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Next,
    Stop,
}

/// Returns true if the handler's predicate admits it.
fn admits(resolved: &ResolvedHandler, ctx: &EventContext, opts: &ChainOptions) -> bool {
    let Some(predicate) = &resolved.predicate else {
        return true;
    };
    match predicate.evaluate(ctx) {
        Ok(admitted) => admitted,
        Err(err) => {
            if opts.trace {
                tracing::debug!(
                    router = %opts.router,
                    event = ctx.event(),
                    priority = resolved.priority,
                    error = %err,
                    "predicate failed, skipping handler"
                );
            }
            false
        }
    }
}

fn absorb(ctx: &mut EventContext, result: HandlerResult, opts: &ChainOptions) -> Step {
    match result {
        Ok(Some(value)) => ctx.output = Some(value),
        Ok(None) => {}
        Err(HandlerError::Stop) => return Step::Stop,
        Err(HandlerError::Failed(err)) => {
            let failure = HandlerFailure::new(err);
            if opts.log_errors {
                tracing::warn!(
                    router = %opts.router,
                    event = ctx.event(),
                    error = %failure,
                    "handler failed"
                );
            }
            ctx.record_failure(failure);
        }
    }
    if ctx.should_stop() {
        Step::Stop
    } else {
        Step::Next
    }
}

/// Run the sync handlers of the chain on the calling thread. Async handlers
/// are skipped without being called.
pub(crate) fn run_inline(handlers: &[ResolvedHandler], ctx: &mut EventContext, opts: &ChainOptions) {
    for resolved in handlers {
        if !admits(resolved, ctx, opts) {
            continue;
        }
        let Some(result) = resolved.handler.call_sync(ctx) else {
            if opts.trace {
                tracing::debug!(
                    router = %opts.router,
                    event = ctx.event(),
                    priority = resolved.priority,
                    "skipping async handler in sync-only dispatch"
                );
            }
            continue;
        };
        if absorb(ctx, result, opts) == Step::Stop {
            break;
        }
    }
}

/// Run the chain, awaiting async handlers.
pub(crate) async fn run_suspending(
    handlers: &[ResolvedHandler],
    ctx: &mut EventContext,
    opts: &ChainOptions,
) {
    for resolved in handlers {
        if !admits(resolved, ctx, opts) {
            continue;
        }
        let result = resolved.handler.invoke(ctx).await;
        if absorb(ctx, result, opts) == Step::Stop {
            break;
        }
    }
}

/// Run the chain from a thread that cannot suspend.
///
/// Each async handler is moved, together with the context, onto the
/// background loop; the calling thread blocks until the context comes back
/// or `timeout` passes.
pub(crate) fn run_bridged(
    handlers: &[ResolvedHandler],
    mut ctx: EventContext,
    opts: &ChainOptions,
    bridge: &BackgroundLoop,
    timeout: Option<Duration>,
) -> Result<EventContext, DispatchError> {
    for resolved in handlers {
        if !admits(resolved, &ctx, opts) {
            continue;
        }
        let result = match resolved.handler.call_sync(&mut ctx) {
            Some(result) => result,
            None if bridge.is_loop_thread() => {
                Err(HandlerError::Failed(Box::new(DispatchError::BridgeReentered)))
            }
            None => {
                let (returned, result) = bridge_one(resolved, ctx, bridge, timeout)?;
                ctx = returned;
                result
            }
        };
        if absorb(&mut ctx, result, opts) == Step::Stop {
            break;
        }
    }
    Ok(ctx)
}

fn bridge_one(
    resolved: &ResolvedHandler,
    mut ctx: EventContext,
    bridge: &BackgroundLoop,
    timeout: Option<Duration>,
) -> Result<(EventContext, HandlerResult), DispatchError> {
    let handle = bridge.handle()?;
    let event = ctx.event().to_string();
    let handler = resolved.handler.clone();
    let (tx, rx) = mpsc::sync_channel(1);

    let task = handle.spawn(async move {
        let result = handler.invoke(&mut ctx).await;
        let _ = tx.send((ctx, result));
    });

    let received = match timeout {
        Some(timeout) => rx.recv_timeout(timeout).map_err(|err| match err {
            mpsc::RecvTimeoutError::Timeout => DispatchError::Timeout {
                event: event.clone(),
                timeout,
            },
            mpsc::RecvTimeoutError::Disconnected => {
                DispatchError::BridgeUnavailable("background loop stopped mid-dispatch".into())
            }
        }),
        None => rx.recv().map_err(|_| {
            DispatchError::BridgeUnavailable("background loop stopped mid-dispatch".into())
        }),
    };

    if received.is_err() {
        task.abort();
    }
    received
}

/// Debug summary of one finished dispatch.
pub(crate) fn trace_dispatch(ctx: &EventContext, handlers: usize, started: Instant, opts: &ChainOptions) {
    if !opts.trace {
        return;
    }
    let elapsed = started.elapsed();
    match &ctx.exception {
        Some(failure) => tracing::debug!(
            router = %opts.router,
            event = ctx.event(),
            handlers,
            ?elapsed,
            exception = %failure,
            "dispatch finished"
        ),
        None => tracing::debug!(
            router = %opts.router,
            event = ctx.event(),
            handlers,
            ?elapsed,
            "dispatch finished"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidings_core::{Handler, Predicate};

    fn opts() -> ChainOptions {
        ChainOptions {
            router: Arc::from("test"),
            log_errors: false,
            trace: true,
        }
    }

    fn resolved(priority: i32, handler: Handler) -> ResolvedHandler {
        ResolvedHandler {
            priority,
            handler,
            predicate: None,
        }
    }

    #[test]
    fn test_failure_is_recorded_and_chain_continues() {
        let chain = vec![
            resolved(2, Handler::new_sync(|_| Err(HandlerError::msg("first broke")))),
            resolved(1, Handler::new_sync(|_| Ok(Some(json!("ran"))))),
        ];
        let mut ctx = EventContext::new("e", ());
        run_inline(&chain, &mut ctx, &opts());
        assert_eq!(ctx.output(), Some(&json!("ran")));
        assert_eq!(ctx.exception.as_ref().map(ToString::to_string).as_deref(), Some("first broke"));
    }

    #[test]
    fn test_stop_signal_ends_chain() {
        let chain = vec![
            resolved(2, Handler::new_sync(|ctx| ctx.stop_with_output("early"))),
            resolved(1, Handler::new_sync(|_| Ok(Some(json!("late"))))),
        ];
        let mut ctx = EventContext::new("e", ());
        run_inline(&chain, &mut ctx, &opts());
        assert_eq!(ctx.output(), Some(&json!("early")));
        assert!(ctx.exception.is_none());
    }

    #[test]
    fn test_stop_with_exception_ends_chain_after_handler() {
        let chain = vec![
            resolved(
                2,
                Handler::new_sync(|ctx| {
                    ctx.stop_with_exception("halt");
                    Ok(Some(json!("partial")))
                }),
            ),
            resolved(1, Handler::new_sync(|_| Ok(Some(json!("late"))))),
        ];
        let mut ctx = EventContext::new("e", ());
        run_inline(&chain, &mut ctx, &opts());
        assert_eq!(ctx.output(), Some(&json!("partial")));
        assert!(ctx.exception.is_some());
    }

    #[test]
    fn test_failing_predicate_skips_handler() {
        let mut guarded = resolved(1, Handler::new_sync(|_| Ok(Some(json!("guarded")))));
        guarded.predicate = Some(Predicate::fallible(|_| Err("broken guard".into())));
        let mut ctx = EventContext::new("e", ());
        run_inline(&[guarded], &mut ctx, &opts());
        assert!(ctx.output().is_none());
        assert!(ctx.exception.is_none());
    }

    #[test]
    fn test_run_bridged_runs_async_on_loop() {
        let bridge = BackgroundLoop::new("tidings-dispatch-test".into(), Duration::from_secs(5));
        let chain = vec![
            resolved(2, Handler::new_sync(|_| Ok(Some(json!(1))))),
            resolved(
                1,
                Handler::new_async(|ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        let prev = ctx.output_as::<i64>().unwrap_or_default();
                        Ok(Some(json!(prev + 1)))
                    })
                }),
            ),
        ];
        let ctx = run_bridged(&chain, EventContext::new("e", ()), &opts(), &bridge, None).unwrap();
        assert_eq!(ctx.output(), Some(&json!(2)));
        bridge.stop();
    }

    #[test]
    fn test_run_bridged_times_out() {
        let bridge = BackgroundLoop::new("tidings-dispatch-test".into(), Duration::from_secs(5));
        let chain = vec![resolved(
            1,
            Handler::new_async(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(None)
                })
            }),
        )];
        let err = run_bridged(
            &chain,
            EventContext::new("slow", ()),
            &opts(),
            &bridge,
            Some(Duration::from_millis(20)),
        )
        .unwrap_err();
        assert!(err.is_timeout());
        bridge.stop();
    }

    #[tokio::test]
    async fn test_run_suspending_awaits_async() {
        let chain = vec![resolved(
            1,
            Handler::new_async(|_| Box::pin(async { Ok(Some(json!("awaited"))) })),
        )];
        let mut ctx = EventContext::new("e", ());
        run_suspending(&chain, &mut ctx, &opts()).await;
        assert_eq!(ctx.output(), Some(&json!("awaited")));
    }
}
