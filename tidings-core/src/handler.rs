//! # Handlers and Predicates
//!
//! A [`Handler`] is a registered callable invoked with the [`EventContext`] of
//! the dispatch it belongs to. Handlers come in two flavours:
//!
//! - **Sync**: `Fn(&mut EventContext) -> HandlerResult`, run inline on whatever
//!   thread is dispatching
//! - **Async**: `Fn(&mut EventContext) -> BoxFuture<HandlerResult>`, awaited by
//!   suspending callers and bridged to the background loop for blocking ones
//!
//! The dispatcher inspects the flavour to decide how to run the chain, so the
//! distinction is part of the type rather than discovered at call time.
//!
//! # Identity
//!
//! Cloning a `Handler` shares the underlying function. Two clones have the same
//! [`HandlerId`], which is how the registry recognises "the same callable"
//! registered twice.

use crate::{
    context::EventContext,
    error::{BoxError, HandlerError, HandlerPanic},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// What a handler body returns.
///
/// - `Ok(Some(value))` overwrites the context output
/// - `Ok(None)` leaves it alone
/// - `Err(HandlerError::Stop)` ends the chain cleanly
/// - `Err(HandlerError::Failed(_))` is recorded on the context
pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// Signature of a synchronous handler.
pub type SyncHandlerFn = dyn Fn(&mut EventContext) -> HandlerResult + Send + Sync + 'static;

/// Signature of an asynchronous handler.
pub type AsyncHandlerFn = dyn for<'a> Fn(&'a mut EventContext) -> BoxFuture<'a, HandlerResult>
    + Send
    + Sync
    + 'static;

/// Identity of a registered handler function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

/// A registered event handler.
#[derive(Clone)]
pub enum Handler {
    /// Runs to completion on the dispatching thread.
    Sync(Arc<SyncHandlerFn>),
    /// Must be awaited.
    Async(Arc<AsyncHandlerFn>),
}

impl Handler {
    /// Wrap a synchronous closure.
    pub fn new_sync<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous closure.
    ///
    /// ```rust,ignore
    /// let handler = Handler::new_async(|ctx| Box::pin(async move {
    ///     let name = ctx.param_as::<String>("name");
    ///     Ok(name.map(Into::into))
    /// }));
    /// ```
    pub fn new_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut EventContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        Handler::Async(Arc::new(f))
    }

    /// Returns true for async handlers.
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }

    /// Identity shared by all clones of this handler.
    pub fn id(&self) -> HandlerId {
        let ptr = match self {
            Handler::Sync(f) => Arc::as_ptr(f) as *const () as usize,
            Handler::Async(f) => Arc::as_ptr(f) as *const () as usize,
        };
        HandlerId(ptr)
    }

    /// Run a sync handler, converting a panic into a failure.
    ///
    /// Returns `None` for async handlers.
    pub fn call_sync(&self, ctx: &mut EventContext) -> Option<HandlerResult> {
        match self {
            Handler::Sync(f) => Some(
                catch_unwind(AssertUnwindSafe(|| f(ctx)))
                    .unwrap_or_else(|payload| Err(HandlerPanic::from_payload(payload).into())),
            ),
            Handler::Async(_) => None,
        }
    }

    /// Run either flavour to completion, converting a panic into a failure.
    pub async fn invoke(&self, ctx: &mut EventContext) -> HandlerResult {
        match self {
            Handler::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(ctx)))
                .unwrap_or_else(|payload| Err(HandlerPanic::from_payload(payload).into())),
            // Building the future happens inside the guarded block, so a panic
            // before the first await is caught too.
            Handler::Async(f) => AssertUnwindSafe(async move { f(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(HandlerPanic::from_payload(payload).into())),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_async() { "Async" } else { "Sync" };
        f.debug_tuple(kind).field(&self.id()).finish()
    }
}

/// Guard evaluated against the context before a handler runs.
///
/// An `Err` or a panic counts as "false": the handler is skipped.
#[derive(Clone)]
pub struct Predicate(
    Arc<dyn Fn(&EventContext) -> Result<bool, BoxError> + Send + Sync + 'static>,
);

impl Predicate {
    /// Wrap an infallible check.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EventContext) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx| Ok(f(ctx))))
    }

    /// Wrap a check that can fail.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&EventContext) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluate, converting a panic into an error.
    pub fn evaluate(&self, ctx: &EventContext) -> Result<bool, BoxError> {
        catch_unwind(AssertUnwindSafe(|| (self.0)(ctx)))
            .unwrap_or_else(|payload| Err(HandlerPanic::from_payload(payload).into()))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clone_shares_identity() {
        let h = Handler::new_sync(|_| Ok(None));
        let same = h.clone();
        let other = Handler::new_sync(|_| Ok(None));
        assert_eq!(h.id(), same.id());
        assert_ne!(h.id(), other.id());
    }

    #[test]
    fn test_call_sync_catches_panic() {
        let h = Handler::new_sync(|_| panic!("kaboom"));
        let mut ctx = EventContext::new("e", ());
        match h.call_sync(&mut ctx) {
            Some(Err(HandlerError::Failed(err))) => assert!(err.to_string().contains("kaboom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_call_sync_skips_async() {
        let h = Handler::new_async(|_| Box::pin(async { Ok(None) }));
        let mut ctx = EventContext::new("e", ());
        assert!(h.is_async());
        assert!(h.call_sync(&mut ctx).is_none());
    }

    #[tokio::test]
    async fn test_invoke_async_reads_and_writes_context() {
        let h = Handler::new_async(|ctx| {
            Box::pin(async move {
                let n = ctx.param_as::<i64>("n").unwrap_or_default();
                Ok(Some(json!(n * 2)))
            })
        });
        let mut ctx = EventContext::new("e", [("n", json!(21))]);
        let out = h.invoke(&mut ctx).await.unwrap();
        assert_eq!(out, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_invoke_async_catches_panic() {
        let h = Handler::new_async(|_| {
            Box::pin(async {
                let fail = true;
                if fail {
                    panic!("late");
                }
                Ok(None)
            })
        });
        let mut ctx = EventContext::new("e", ());
        assert!(matches!(h.invoke(&mut ctx).await, Err(HandlerError::Failed(_))));
    }

    #[test]
    fn test_predicate_failure_and_panic_are_errors() {
        let ctx = EventContext::new("e", ());
        assert!(Predicate::new(|_| true).evaluate(&ctx).unwrap());
        assert!(Predicate::fallible(|_| Err("nope".into())).evaluate(&ctx).is_err());
        assert!(Predicate::new(|_| panic!("bad")).evaluate(&ctx).is_err());
    }
}
