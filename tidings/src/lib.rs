//! # tidings - Priority-Ordered Event Dispatch
//!
//! `tidings` lets independent components communicate through named events
//! instead of direct references. Components register handlers on an
//! [`EventRouter`]; callers later dispatch events and receive an
//! [`EventContext`] carrying the parameters and the accumulated output.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tidings::prelude::*;
//!
//! let router = EventRouter::new();
//!
//! router.on("greet").priority(200).handle(|ctx| {
//!     let name = ctx.param_as::<String>("name").unwrap_or_default();
//!     Ok(Some(json!(format!("hello {name}"))))
//! });
//!
//! router.on("greet").handle_async(|ctx| Box::pin(async move {
//!     let greeting = ctx.output_as::<String>().unwrap_or_default();
//!     Ok(Some(json!(format!("{greeting}!"))))
//! }));
//!
//! // Blocking callers: async handlers run on the background loop.
//! let ctx = router.apply_sync("greet", [("name", "ada")])?;
//! assert_eq!(ctx.output(), Some(&json!("hello ada!")));
//!
//! // Fire-and-forget, then wait for background work.
//! router.emit("greet", [("name", "grace")]);
//! router.join(None);
//! ```
//!
//! ## Dispatch Methods
//!
//! - [`EventRouter::emit`]: fire-and-forget
//! - [`EventRouter::apply_sync`]: blocking, bridges async handlers
//! - [`EventRouter::apply_async`]: suspending
//! - [`EventRouter::apply_typed`] / [`EventRouter::apply_typed_sync`]: typed
//!   parameters and output; the sync form skips async handlers
//!
//! ## Components
//!
//! With the `macros` feature (default), `#[handlers]` turns `#[on(...)]`
//! methods into a [`RegisterHandlers`] implementation:
//!
//! ```rust,ignore
//! #[tidings::handlers]
//! impl Audit {
//!     #[on("user:login", priority = 10)]
//!     fn record(&self, ctx: &mut EventContext) -> HandlerResult {
//!         self.log.lock().unwrap().push(ctx.event().to_string());
//!         Ok(None)
//!     }
//! }
//!
//! let router = EventRouter::new().with_handlers(Arc::new(Audit::default()));
//! ```

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use tidings_core::{
    // Handler protocol
    AsyncHandlerFn,
    // Error types
    BoxError,
    // Defaults
    DEFAULT_PRIORITY,
    DispatchError,
    // Context
    EventContext,
    Handler,
    HandlerError,
    HandlerFailure,
    HandlerId,
    HandlerPanic,
    HandlerResult,
    Parameters,
    Predicate,
    SyncHandlerFn,
    Value,
};

pub use tidings_std::{
    // Routing
    EventRouter,
    HandlerRegistration,
    HandlerRegistry,
    // Lifecycle
    Lifecycle,
    On,
    Phases,
    // Components
    RegisterHandlers,
    Registered,
    ResolvedHandler,
    // Configuration
    RouterConfig,
    // Signals
    ShutdownRegistry,
    // Typed dispatch
    TypedContext,
};

pub use futures::future::BoxFuture;
pub use serde_json::json;

/// Process-wide shutdown-signal handling.
pub mod signals {
    pub use tidings_std::signals::{
        SIGNAL_EXIT_CODE, ShutdownRegistry, registry, wait_for_shutdown_signal,
    };
}

/// Testing utilities.
pub mod testing {
    pub use tidings_std::testing::{CallLog, RecordingHandler};
}

/// Prelude module - common imports for Tidings.
///
/// # Usage
///
/// ```rust,ignore
/// use tidings::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BoxFuture,
        DispatchError,
        EventContext,
        EventRouter,
        Handler,
        HandlerError,
        HandlerResult,
        Parameters,
        Phases,
        Predicate,
        RegisterHandlers,
        RouterConfig,
        TypedContext,
        json,
    };

    #[cfg(feature = "macros")]
    pub use crate::handlers;
}

#[cfg(feature = "macros")]
pub use tidings_macros::handlers;
