//! The event router.
//!
//! [`EventRouter`] owns a [`HandlerRegistry`], a list of broadcast targets,
//! the background loop used to bridge async handlers into blocking callers,
//! and the set of fire-and-forget units still running.
//!
//! # Dispatch methods
//!
//! | Method | Caller | Async handlers | Returns |
//! |---|---|---|---|
//! | [`emit`](EventRouter::emit) | any | scheduled as one background unit | nothing |
//! | [`apply_sync`](EventRouter::apply_sync) | blocking | bridged to the background loop | `Result<EventContext, DispatchError>` |
//! | [`apply_async`](EventRouter::apply_async) | async | awaited | `EventContext` |
//! | [`apply_typed`](EventRouter::apply_typed) | async | awaited | `TypedContext<P, R>` |
//! | [`apply_typed_sync`](EventRouter::apply_typed_sync) | blocking | **skipped** | `TypedContext<P, R>` |
//!
//! # Handler order
//!
//! Own handlers run first, highest priority first and registration order
//! within a priority. Then each broadcast target contributes its own resolved
//! list, in the order the targets were added. Targets are not merged into a
//! single priority order.
//!
//! # Example
//!
//! ```rust,ignore
//! let router = EventRouter::new();
//! router.on("greet").priority(200).handle(|ctx| {
//!     let name = ctx.param_as::<String>("name").unwrap_or_default();
//!     Ok(Some(format!("hello {name}").into()))
//! });
//!
//! let ctx = router.apply_sync("greet", [("name", "ada")])?;
//! assert_eq!(ctx.output_as::<String>().as_deref(), Some("hello ada"));
//! ```

use crate::{
    bridge::BackgroundLoop,
    config::RouterConfig,
    dispatch::{self, ChainOptions},
    lifecycle::{Lifecycle, Phases},
    outstanding::Outstanding,
    register::RegisterHandlers,
    registry::{HandlerRegistry, Registered, ResolvedHandler},
    signals,
    typed::{self, TypedContext},
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};
use tidings_core::{
    DEFAULT_PRIORITY, DispatchError, EventContext, Handler, HandlerResult, Parameters, Predicate,
};
use tokio::runtime::Handle;

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// A priority-ordered publish/subscribe router.
///
/// Cloning is cheap and yields another handle to the same router. When the
/// last handle is dropped the router closes itself.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    id: u64,
    label: Arc<str>,
    config: RouterConfig,
    registry: RwLock<HandlerRegistry>,
    targets: RwLock<Vec<EventRouter>>,
    bridge: BackgroundLoop,
    outstanding: Arc<Outstanding>,
}

impl RouterInner {
    fn shutdown(&self) -> usize {
        let cancelled = self.outstanding.cancel_all();
        self.bridge.stop();
        if self.config.handle_signals {
            signals::registry().unregister(self.id);
        }
        cancelled
    }
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registration builder returned by [`EventRouter::on`].
#[must_use = "a handler is only registered by `call`, `handle` or `handle_async`"]
pub struct On<'r> {
    router: &'r EventRouter,
    event: String,
    priority: i32,
    predicate: Option<Predicate>,
}

impl On<'_> {
    /// Set the priority. Higher runs first; the default is 100.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Guard the handler with a closure.
    pub fn when<F>(self, f: F) -> Self
    where
        F: Fn(&EventContext) -> bool + Send + Sync + 'static,
    {
        self.predicate(Predicate::new(f))
    }

    /// Guard the handler with a prepared [`Predicate`].
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Register `handler` and hand it back, so the same handler can be
    /// registered again (for example under another priority).
    pub fn call(self, handler: Handler) -> Handler {
        self.router
            .register(&self.event, self.priority, handler.clone(), self.predicate);
        handler
    }

    /// Register a synchronous closure.
    pub fn handle<F>(self, f: F) -> Handler
    where
        F: Fn(&mut EventContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.call(Handler::new_sync(f))
    }

    /// Register an asynchronous closure.
    pub fn handle_async<F>(self, f: F) -> Handler
    where
        F: for<'a> Fn(&'a mut EventContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.call(Handler::new_async(f))
    }
}

impl EventRouter {
    /// Create a router with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with `config`.
    pub fn with_config(config: RouterConfig) -> Self {
        let id = NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed);
        let label: Arc<str> = match &config.name {
            Some(name) => Arc::from(name.as_str()),
            None => Arc::from(format!("router-{id}")),
        };
        let inner = Arc::new(RouterInner {
            id,
            label,
            bridge: BackgroundLoop::new(config.thread_name(), config.loop_start_timeout),
            registry: RwLock::new(HandlerRegistry::new()),
            targets: RwLock::new(Vec::new()),
            outstanding: Outstanding::new(),
            config,
        });
        if inner.config.handle_signals {
            signals::register(inner.id, &inner.outstanding);
        }
        Self { inner }
    }

    /// Builder-style [`attach`](Self::attach).
    pub fn with_handlers<T: RegisterHandlers>(self, component: Arc<T>) -> Self {
        self.attach(component);
        self
    }

    /// The router's configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Label used in logs: the configured name or `router-{id}`.
    pub fn name(&self) -> &str {
        &self.inner.label
    }

    /// Returns true if both handles refer to the same router.
    pub fn ptr_eq(&self, other: &EventRouter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HandlerRegistry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            router: Arc::clone(&self.inner.label),
            log_errors: self.inner.config.log_handler_errors,
            trace: self.inner.config.trace,
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Start registering a handler for `event`.
    ///
    /// ```rust,ignore
    /// router
    ///     .on("tool:call")
    ///     .priority(200)
    ///     .when(|ctx| ctx.param("name").is_some())
    ///     .handle(|ctx| Ok(ctx.param("name").cloned()));
    /// ```
    pub fn on(&self, event: impl Into<String>) -> On<'_> {
        On {
            router: self,
            event: event.into(),
            priority: DEFAULT_PRIORITY,
            predicate: None,
        }
    }

    /// Register a sync closure at the default priority.
    pub fn on_sync<F>(&self, event: impl Into<String>, f: F) -> Handler
    where
        F: Fn(&mut EventContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(event).handle(f)
    }

    /// Register an async closure at the default priority.
    pub fn on_async<F>(&self, event: impl Into<String>, f: F) -> Handler
    where
        F: for<'a> Fn(&'a mut EventContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.on(event).handle_async(f)
    }

    /// Register `handler` for `event` at `priority`.
    ///
    /// Registering the same handler again at the same priority only replaces
    /// its predicate.
    pub fn register(
        &self,
        event: &str,
        priority: i32,
        handler: Handler,
        predicate: Option<Predicate>,
    ) -> Registered {
        let outcome = self
            .write_registry()
            .register(event, priority, handler, predicate);
        if self.inner.config.trace {
            tracing::debug!(router = %self.inner.label, event, priority, ?outcome, "handler registered");
        }
        outcome
    }

    /// Let `component` register its handlers on this router.
    pub fn attach<T: RegisterHandlers>(&self, component: Arc<T>) {
        component.register_handlers(self);
    }

    /// Number of handlers registered for `event` on this router, ignoring
    /// broadcast targets.
    pub fn handler_count(&self, event: &str) -> usize {
        self.read_registry().handler_count(event)
    }

    /// The handlers a dispatch of `event` would run, in order.
    ///
    /// A router reachable through two targets contributes under each of them.
    /// A router already being resolved further up the chain is skipped, which
    /// cuts broadcast cycles.
    pub fn sorted_handlers(&self, event: &str) -> Vec<ResolvedHandler> {
        let mut path = HashSet::new();
        let mut resolved = Vec::new();
        self.collect_handlers(event, &mut path, &mut resolved);
        resolved
    }

    fn collect_handlers(
        &self,
        event: &str,
        path: &mut HashSet<u64>,
        resolved: &mut Vec<ResolvedHandler>,
    ) {
        if !path.insert(self.inner.id) {
            return;
        }
        resolved.extend(self.read_registry().sorted(event));

        let targets = self
            .inner
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for target in &targets {
            target.collect_handlers(event, path, resolved);
        }
        path.remove(&self.inner.id);
    }

    // ------------------------------------------------------------------
    // Broadcast network
    // ------------------------------------------------------------------

    /// Also run `other`'s handlers whenever this router dispatches.
    ///
    /// Returns the target's position in the broadcast list. Adding the same
    /// target again returns its existing position.
    pub fn broadcast_to(&self, other: &EventRouter) -> usize {
        let mut targets = self
            .inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = targets.iter().position(|t| t.ptr_eq(other)) {
            return index;
        }
        targets.push(other.clone());
        targets.len() - 1
    }

    /// Make `other` broadcast to this router.
    pub fn consume_from(&self, other: &EventRouter) {
        other.broadcast_to(self);
    }

    /// Remove `other` from the broadcast list. Returns true if it was there.
    ///
    /// Targets are held strongly, so a broadcast cycle keeps its routers alive
    /// until one edge is removed.
    pub fn stop_broadcasting_to(&self, other: &EventRouter) -> bool {
        let mut targets = self
            .inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = targets.len();
        targets.retain(|t| !t.ptr_eq(other));
        targets.len() != before
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Fire-and-forget dispatch.
    ///
    /// When every resolved handler is sync, the chain runs inline before this
    /// returns. Otherwise the whole chain is scheduled as one background unit:
    /// on the caller's tokio runtime if there is one, else on the router's
    /// background loop. In the latter case the caller waits at most
    /// `submit_timeout` for the loop to pick the unit up.
    pub fn emit(&self, event: &str, params: impl Into<Parameters>) {
        let handlers = self.sorted_handlers(event);
        let mut ctx = EventContext::new(event, params);
        let opts = self.chain_options();

        if !handlers.iter().any(ResolvedHandler::is_async) {
            let started = Instant::now();
            dispatch::run_inline(&handlers, &mut ctx, &opts);
            dispatch::trace_dispatch(&ctx, handlers.len(), started, &opts);
            return;
        }
        self.schedule(handlers, ctx, opts);
    }

    fn schedule(&self, handlers: Vec<ResolvedHandler>, ctx: EventContext, opts: ChainOptions) {
        if let Ok(handle) = Handle::try_current() {
            self.inner
                .outstanding
                .spawn(&handle, unit(handlers, ctx, opts, None));
            return;
        }

        let handle = match self.inner.bridge.handle() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(
                    router = %self.inner.label,
                    event = ctx.event(),
                    error = %err,
                    label = err.as_label(),
                    "cannot schedule background dispatch"
                );
                return;
            }
        };
        let event = ctx.event().to_string();
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.inner
            .outstanding
            .spawn(&handle, unit(handlers, ctx, opts, Some(ack_tx)));

        if ack_rx.recv_timeout(self.inner.config.submit_timeout).is_err() && self.inner.config.trace {
            tracing::debug!(
                router = %self.inner.label,
                event = %event,
                "background unit not picked up within submit timeout"
            );
        }
    }

    /// Blocking dispatch.
    ///
    /// Async handlers run on the background loop while this thread waits, for
    /// at most `default_event_timeout` each. Handler failures are recorded on
    /// the returned context; only the bridge itself can make this fail.
    ///
    /// Do not call this from a single-threaded runtime that a bridged handler
    /// needs in order to make progress.
    pub fn apply_sync(
        &self,
        event: &str,
        params: impl Into<Parameters>,
    ) -> Result<EventContext, DispatchError> {
        let handlers = self.sorted_handlers(event);
        let ctx = EventContext::new(event, params);
        let opts = self.chain_options();

        let started = Instant::now();
        let ctx = dispatch::run_bridged(
            &handlers,
            ctx,
            &opts,
            &self.inner.bridge,
            self.inner.config.default_event_timeout,
        )
        .inspect_err(|err| {
            if opts.trace {
                tracing::debug!(router = %opts.router, event, error = %err, "blocking dispatch aborted");
            }
        })?;
        dispatch::trace_dispatch(&ctx, handlers.len(), started, &opts);
        Ok(ctx)
    }

    /// Suspending dispatch: sync handlers run inline, async handlers are
    /// awaited in turn.
    pub async fn apply_async(&self, event: &str, params: impl Into<Parameters>) -> EventContext {
        let ctx = EventContext::new(event, params);
        self.run_suspending(ctx).await
    }

    async fn run_suspending(&self, mut ctx: EventContext) -> EventContext {
        let handlers = self.sorted_handlers(ctx.event());
        let opts = self.chain_options();
        let started = Instant::now();
        dispatch::run_suspending(&handlers, &mut ctx, &opts).await;
        dispatch::trace_dispatch(&ctx, handlers.len(), started, &opts);
        ctx
    }

    /// Typed suspending dispatch.
    ///
    /// Parameters are materialized into `P` when they deserialize cleanly,
    /// and an `"output"` parameter pre-seeds the output. Use [`Parameters`]
    /// as `P` and [`Value`](tidings_core::Value) as `R` for no declared type.
    pub async fn apply_typed<P, R>(
        &self,
        event: &str,
        params: impl Into<Parameters>,
    ) -> TypedContext<P, R>
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: DeserializeOwned,
    {
        let ctx = typed::prepare::<P>(event, params.into(), self.inner.config.trace);
        TypedContext::new(self.run_suspending(ctx).await)
    }

    /// Typed blocking dispatch that runs sync handlers only.
    ///
    /// Async handlers are skipped, not bridged.
    pub fn apply_typed_sync<P, R>(&self, event: &str, params: impl Into<Parameters>) -> TypedContext<P, R>
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: DeserializeOwned,
    {
        let mut ctx = typed::prepare::<P>(event, params.into(), self.inner.config.trace);
        let handlers = self.sorted_handlers(event);
        let opts = self.chain_options();
        let started = Instant::now();
        dispatch::run_inline(&handlers, &mut ctx, &opts);
        dispatch::trace_dispatch(&ctx, handlers.len(), started, &opts);
        TypedContext::new(ctx)
    }

    /// Wrap calls so their phases are dispatched as `"{event}:{phase}"`.
    pub fn lifecycle(&self, event: impl Into<String>, phases: Phases) -> Lifecycle {
        Lifecycle::new(self.clone(), event.into(), phases)
    }

    // ------------------------------------------------------------------
    // Outstanding work
    // ------------------------------------------------------------------

    /// Number of background units still running.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.len()
    }

    /// Block until every background unit has finished, or `timeout` passes
    /// (`None` uses `join_timeout`). Returns true if everything finished.
    ///
    /// Inside a runtime prefer [`join_async`](Self::join_async): units
    /// scheduled on that runtime may need this thread to make progress.
    pub fn join(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.inner.config.join_timeout);
        if self.inner.outstanding.is_empty() {
            return true;
        }
        // The loop cannot drive a wait it is blocked inside of.
        if self.inner.bridge.is_loop_thread() {
            tracing::warn!(router = %self.inner.label, "join called from the background loop, not waiting");
            return self.inner.outstanding.is_empty();
        }
        let drained = match self.inner.bridge.handle() {
            Ok(handle) => self.inner.outstanding.wait_blocking(&handle, timeout),
            Err(err) => {
                tracing::warn!(router = %self.inner.label, error = %err, "cannot wait for background work");
                self.inner.outstanding.is_empty()
            }
        };
        if !drained {
            self.warn_join_expired(timeout);
        }
        drained
    }

    /// Suspend until every background unit has finished, or `timeout` passes.
    pub async fn join_async(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.inner.config.join_timeout);
        let drained = self.inner.outstanding.wait(timeout).await;
        if !drained {
            self.warn_join_expired(timeout);
        }
        drained
    }

    fn warn_join_expired(&self, timeout: Duration) {
        tracing::warn!(
            router = %self.inner.label,
            remaining = self.inner.outstanding.len(),
            ?timeout,
            "join timed out with background work outstanding"
        );
    }

    /// Cancel all background units and stop the background loop.
    ///
    /// Units on the background loop are gone when this returns. Units on a
    /// caller's runtime leave the set the next time that runtime polls them.
    ///
    /// Idempotent. Registrations survive, and the loop starts again if a later
    /// dispatch needs it.
    pub fn close(&self) {
        let cancelled = self.inner.shutdown();
        tracing::debug!(router = %self.inner.label, cancelled, "router closed");
    }

    /// Async form of [`close`](Self::close); waits for the loop thread and
    /// for cancelled units to leave the set without blocking the runtime.
    pub async fn close_async(&self) {
        let cancelled = self.inner.outstanding.cancel_all();
        if let Some(join) = self.inner.bridge.take().and_then(|running| running.signal()) {
            match Handle::try_current() {
                Ok(handle) => {
                    let _ = handle.spawn_blocking(move || join.join()).await;
                }
                Err(_) => {
                    let _ = join.join();
                }
            }
        }
        if self.inner.config.handle_signals {
            signals::registry().unregister(self.inner.id);
        }
        if Handle::try_current().is_ok() {
            self.inner.outstanding.wait(self.inner.config.join_timeout).await;
        }
        tracing::debug!(router = %self.inner.label, cancelled, "router closed");
    }
}

/// One fire-and-forget dispatch, run to completion as a background task.
async fn unit(
    handlers: Vec<ResolvedHandler>,
    mut ctx: EventContext,
    opts: ChainOptions,
    ack: Option<mpsc::SyncSender<()>>,
) {
    if let Some(ack) = ack {
        let _ = ack.try_send(());
    }
    let started = Instant::now();
    dispatch::run_suspending(&handlers, &mut ctx, &opts).await;
    dispatch::trace_dispatch(&ctx, handlers.len(), started, &opts);
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("name", &self.inner.label)
            .field("outstanding", &self.inner.outstanding.len())
            .field("bridge_running", &self.inner.bridge.is_running())
            .finish_non_exhaustive()
    }
}
