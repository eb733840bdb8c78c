#![cfg(feature = "macros")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tidings::{EventContext, EventRouter, HandlerResult, RegisterHandlers, json};

#[derive(Default)]
struct Audit {
    entries: Mutex<Vec<String>>,
    lookups: AtomicUsize,
}

fn is_admin(ctx: &EventContext) -> bool {
    ctx.param_as::<bool>("admin").unwrap_or(false)
}

#[tidings::handlers]
impl Audit {
    #[on("user:login", priority = 200)]
    fn first(&self, ctx: &mut EventContext) -> HandlerResult {
        self.entries.lock().unwrap().push(format!("first:{}", ctx.event()));
        Ok(Some(json!("first")))
    }

    #[on("user:login")]
    #[on("user:logout", priority = 5)]
    async fn second(&self, ctx: &mut EventContext) -> HandlerResult {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        self.entries.lock().unwrap().push(format!("second:{}", ctx.event()));
        if ctx.output_as::<String>().as_deref() == Some("first") {
            return Ok(Some(json!("second")));
        }
        Ok(None)
    }

    #[on("lookup", "lookup:again", priority = 50, when = is_admin)]
    fn admin_lookup(&self, ctx: &mut EventContext) -> HandlerResult {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        ctx.stop_with_output("admin")
    }

    #[on("lookup")]
    fn stateless(_ctx: &mut EventContext) -> HandlerResult {
        Ok(Some(json!("guest")))
    }

    /// Untagged methods are left alone.
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

#[test]
fn test_tagged_methods_are_registered() {
    let audit = Arc::new(Audit::default());
    let router = EventRouter::new().with_handlers(Arc::clone(&audit));

    assert_eq!(router.handler_count("user:login"), 2);
    assert_eq!(router.handler_count("user:logout"), 1);
    assert_eq!(router.handler_count("lookup"), 2);
    assert_eq!(router.handler_count("lookup:again"), 1);

    let ctx = router.apply_sync("user:login", ()).unwrap();
    assert_eq!(ctx.output_as::<String>().as_deref(), Some("second"));
    assert_eq!(audit.entries(), ["first:user:login", "second:user:login"]);
}

#[test]
fn test_predicate_and_stop_from_macro() {
    let audit = Arc::new(Audit::default());
    let router = EventRouter::new();
    router.attach(Arc::clone(&audit));

    let admin = router.apply_sync("lookup", [("admin", true)]).unwrap();
    assert_eq!(admin.output_as::<String>().as_deref(), Some("admin"));
    let guest = router.apply_sync("lookup", ()).unwrap();
    assert_eq!(guest.output_as::<String>().as_deref(), Some("guest"));
    assert_eq!(audit.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_method_awaited() {
    let audit = Arc::new(Audit::default());
    let router = EventRouter::new();
    Arc::clone(&audit).register_handlers(&router);

    router.emit("user:logout", ());
    assert!(router.join_async(None).await);
    assert_eq!(audit.entries(), ["second:user:logout"]);
}
