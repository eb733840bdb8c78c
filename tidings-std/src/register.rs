//! Handler-owning components.
//!
//! A type that owns handlers implements [`RegisterHandlers`] once and is
//! attached to a router with [`EventRouter::attach`]. The `#[handlers]`
//! attribute from the `tidings` crate generates the implementation from
//! `#[on(...)]`-tagged methods.

use crate::router::EventRouter;
use std::sync::Arc;

/// A component that registers its own handlers on a router.
///
/// # Example
///
/// ```rust,ignore
/// struct Audit {
///     log: Mutex<Vec<String>>,
/// }
///
/// impl RegisterHandlers for Audit {
///     fn register_handlers(self: Arc<Self>, router: &EventRouter) {
///         let this = Arc::clone(&self);
///         router.on("user:login").priority(10).handle(move |ctx| {
///             this.log.lock().unwrap().push(ctx.event().to_string());
///             Ok(None)
///         });
///     }
/// }
///
/// let router = EventRouter::new().with_handlers(Arc::new(Audit::default()));
/// ```
pub trait RegisterHandlers: Send + Sync + 'static {
    /// Register every handler this component owns on `router`.
    fn register_handlers(self: Arc<Self>, router: &EventRouter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter {
        greeting: &'static str,
    }

    impl RegisterHandlers for Greeter {
        fn register_handlers(self: Arc<Self>, router: &EventRouter) {
            let this = Arc::clone(&self);
            router.on("greet").handle(move |_| Ok(Some(json!(this.greeting))));
            router
                .on("greet")
                .priority(10)
                .handle(move |ctx| Ok(Some(json!(format!("{}!", ctx.output_as::<String>().unwrap_or_default())))));
        }
    }

    #[test]
    fn test_attach_registers_component_handlers() {
        let router = EventRouter::new().with_handlers(Arc::new(Greeter { greeting: "hi" }));
        assert_eq!(router.handler_count("greet"), 2);
        let ctx = router.apply_sync("greet", ()).unwrap();
        assert_eq!(ctx.output(), Some(&json!("hi!")));
    }
}
