//! Lifecycle decorator.
//!
//! A [`Lifecycle`] wraps a call so that selected moments of its execution are
//! dispatched through the router as events named `"{event}:{phase}"`:
//!
//! | Phase | Parameters | Effect of `ctx.output` |
//! |---|---|---|
//! | `before` | call parameters | ignored |
//! | `after` | call parameters + `result` | replaces the return value |
//! | `error` | call parameters + `error` (message) | suppresses the error and becomes the return value |
//! | `finally` | call parameters + `result` (or `null`) + `error` on failure | ignored |
//!
//! Sync calls dispatch `before`/`after`/`error` with `apply_sync` and run
//! `finally` inline. Async calls await `apply_async` and emit `finally`
//! fire-and-forget. Nothing dispatched in `finally` can change the outcome.

use crate::router::EventRouter;
use bitflags::bitflags;
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt::Display, future::Future};
use tidings_core::{EventContext, Parameters, Value};

bitflags! {
    /// Which phases of a wrapped call are dispatched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Phases: u8 {
        /// Before the call.
        const BEFORE = 1 << 0;
        /// After a successful call.
        const AFTER = 1 << 1;
        /// After a failed call.
        const ERROR = 1 << 2;
        /// After the call, whatever the outcome.
        const FINALLY = 1 << 3;
        /// `BEFORE | AFTER`.
        const AROUND = Self::BEFORE.bits() | Self::AFTER.bits();
    }
}

impl Phases {
    fn suffix(self) -> &'static str {
        if self == Phases::BEFORE {
            "before"
        } else if self == Phases::AFTER {
            "after"
        } else if self == Phases::ERROR {
            "error"
        } else {
            "finally"
        }
    }
}

/// Wraps calls for one event name and phase set. See the module docs.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    router: EventRouter,
    event: String,
    phases: Phases,
}

impl Lifecycle {
    pub(crate) fn new(router: EventRouter, event: String, phases: Phases) -> Self {
        Self {
            router,
            event,
            phases,
        }
    }

    /// Name of the event dispatched for `phase`.
    pub fn phase_event(&self, phase: Phases) -> String {
        format!("{}:{}", self.event, phase.suffix())
    }

    /// The configured phases.
    pub fn phases(&self) -> Phases {
        self.phases
    }

    /// Run a synchronous call inside the configured phases.
    pub fn call<T, E, F>(&self, params: impl Into<Parameters>, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        let params = params.into();
        if self.phases.contains(Phases::BEFORE) {
            self.dispatch_blocking(Phases::BEFORE, params.clone());
        }

        let outcome = match f() {
            Ok(value) if self.phases.contains(Phases::AFTER) => {
                let ctx = self.dispatch_blocking(Phases::AFTER, with_result(&params, &value));
                Ok(self.take_override(Phases::AFTER, ctx).unwrap_or(value))
            }
            Err(err) if self.phases.contains(Phases::ERROR) => {
                let ctx = self.dispatch_blocking(Phases::ERROR, with_error(&params, &err));
                self.take_override(Phases::ERROR, ctx).ok_or(err)
            }
            other => other,
        };

        if self.phases.contains(Phases::FINALLY) {
            self.dispatch_blocking(Phases::FINALLY, finally_params(&params, &outcome));
        }
        outcome
    }

    /// Run an asynchronous call inside the configured phases.
    pub async fn call_async<T, E, Fut>(&self, params: impl Into<Parameters>, fut: Fut) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let params = params.into();
        if self.phases.contains(Phases::BEFORE) {
            self.router
                .apply_async(&self.phase_event(Phases::BEFORE), params.clone())
                .await;
        }

        let outcome = match fut.await {
            Ok(value) if self.phases.contains(Phases::AFTER) => {
                let ctx = self
                    .router
                    .apply_async(&self.phase_event(Phases::AFTER), with_result(&params, &value))
                    .await;
                Ok(self.take_override(Phases::AFTER, Some(ctx)).unwrap_or(value))
            }
            Err(err) if self.phases.contains(Phases::ERROR) => {
                let ctx = self
                    .router
                    .apply_async(&self.phase_event(Phases::ERROR), with_error(&params, &err))
                    .await;
                self.take_override(Phases::ERROR, Some(ctx)).ok_or(err)
            }
            other => other,
        };

        if self.phases.contains(Phases::FINALLY) {
            self.router
                .emit(&self.phase_event(Phases::FINALLY), finally_params(&params, &outcome));
        }
        outcome
    }

    /// Turn `f` into a wrapped function. Its argument is serialized into the
    /// phase parameters.
    ///
    /// ```rust,ignore
    /// let search = router
    ///     .lifecycle("search", Phases::all())
    ///     .wrap(|query: Query| backend.search(&query));
    /// let hits = search(Query { text: "rust".into() })?;
    /// ```
    pub fn wrap<A, T, E, F>(self, f: F) -> impl Fn(A) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        E: Display,
        F: Fn(A) -> Result<T, E>,
    {
        move |arg: A| {
            let params = Parameters::from_serialize(&arg).unwrap_or_else(|err| {
                tracing::debug!(event = %self.event, error = %err, "arguments not serializable");
                Parameters::new()
            });
            self.call(params, || f(arg))
        }
    }

    fn dispatch_blocking(&self, phase: Phases, params: Parameters) -> Option<EventContext> {
        let event = self.phase_event(phase);
        match self.router.apply_sync(&event, params) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                tracing::warn!(event = %event, error = %err, label = err.as_label(), "lifecycle dispatch failed");
                None
            }
        }
    }

    fn take_override<T: DeserializeOwned>(&self, phase: Phases, ctx: Option<EventContext>) -> Option<T> {
        let value = ctx?.output?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    event = %self.phase_event(phase),
                    error = %err,
                    "lifecycle output does not match the return type, ignoring"
                );
                None
            }
        }
    }
}

fn with_result<T: Serialize>(params: &Parameters, value: &T) -> Parameters {
    params
        .clone()
        .with("result", serde_json::to_value(value).unwrap_or(Value::Null))
}

fn with_error<E: Display>(params: &Parameters, err: &E) -> Parameters {
    params.clone().with("error", err.to_string())
}

fn finally_params<T: Serialize, E: Display>(params: &Parameters, outcome: &Result<T, E>) -> Parameters {
    match outcome {
        Ok(value) => with_result(params, value),
        Err(err) => with_error(params, err).with("result", Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorder(router: &EventRouter, events: &[&str]) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in events {
            let seen = Arc::clone(&seen);
            router.on_sync(*event, move |ctx| {
                seen.lock().unwrap().push(ctx.event().to_string());
                Ok(None)
            });
        }
        seen
    }

    #[test]
    fn test_phases_run_in_order() {
        let router = EventRouter::new();
        let seen = recorder(&router, &["op:before", "op:after", "op:error", "op:finally"]);
        let lifecycle = router.lifecycle("op", Phases::all());

        let out: Result<i32, String> = lifecycle.call([("x", 1)], || Ok(2));
        assert_eq!(out, Ok(2));
        assert_eq!(*seen.lock().unwrap(), vec!["op:before", "op:after", "op:finally"]);
    }

    #[test]
    fn test_after_overrides_result() {
        let router = EventRouter::new();
        router.on_sync("op:after", |ctx| {
            let result = ctx.param_as::<i32>("result").unwrap_or_default();
            Ok(Some(json!(result * 10)))
        });
        let lifecycle = router.lifecycle("op", Phases::AFTER);
        let out: Result<i32, String> = lifecycle.call((), || Ok(4));
        assert_eq!(out, Ok(40));
    }

    #[test]
    fn test_error_phase_suppresses_or_reraises() {
        let router = EventRouter::new();
        router
            .on("op:error")
            .when(|ctx| ctx.param_as::<String>("error").as_deref() == Some("recoverable"))
            .handle(|ctx| ctx.stop_with_output(-1));
        router.on("op:error").priority(50).handle(|ctx| {
            ctx.stop_with_exception("not recoverable");
            Ok(None)
        });
        let lifecycle = router.lifecycle("op", Phases::ERROR);

        let recovered: Result<i32, String> = lifecycle.call((), || Err("recoverable".into()));
        assert_eq!(recovered, Ok(-1));

        let failed: Result<i32, String> = lifecycle.call((), || Err("fatal".into()));
        assert_eq!(failed, Err("fatal".to_string()));
    }

    #[test]
    fn test_mismatched_override_is_ignored() {
        let router = EventRouter::new();
        router.on_sync("op:after", |_| Ok(Some(json!("not a number"))));
        let out: Result<i32, String> = router.lifecycle("op", Phases::AROUND).call((), || Ok(7));
        assert_eq!(out, Ok(7));
    }

    #[test]
    fn test_wrap_serializes_arguments() {
        #[derive(Serialize)]
        struct Args {
            left: i32,
            right: i32,
        }

        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        router.on_sync("add:before", move |ctx| {
            *sink.lock().unwrap() = ctx.param_as::<i32>("left");
            Ok(None)
        });

        let add = router
            .lifecycle("add", Phases::BEFORE)
            .wrap(|args: Args| Ok::<_, String>(args.left + args.right));
        assert_eq!(add(Args { left: 2, right: 3 }), Ok(5));
        assert_eq!(*seen.lock().unwrap(), Some(2));
    }

    #[test]
    fn test_finally_timeout_keeps_outcome() {
        let router = EventRouter::with_config(
            crate::RouterConfig::default().with_event_timeout(std::time::Duration::from_millis(20)),
        );
        let entered = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&entered);
        router.on_async("op:finally", move |_| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                *flag.lock().unwrap() = true;
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(None)
            })
        });
        let lifecycle = router.lifecycle("op", Phases::FINALLY);

        let ok: Result<i32, String> = lifecycle.call((), || Ok(3));
        assert_eq!(ok, Ok(3));
        let err: Result<i32, String> = lifecycle.call((), || Err("boom".into()));
        assert_eq!(err, Err("boom".to_string()));
        assert!(*entered.lock().unwrap());
        router.close();
    }

    #[tokio::test]
    async fn test_call_async_overrides_and_emits_finally() {
        let router = EventRouter::new();
        router.on_async("fetch:after", |_| Box::pin(async { Ok(Some(json!("cached"))) }));
        let finished = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&finished);
        router.on_async("fetch:finally", move |_| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                *flag.lock().unwrap() = true;
                Ok(None)
            })
        });

        let out: Result<String, String> = router
            .lifecycle("fetch", Phases::AFTER | Phases::FINALLY)
            .call_async((), async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(out.as_deref(), Ok("cached"));

        assert!(router.join_async(Some(std::time::Duration::from_secs(5))).await);
        assert!(*finished.lock().unwrap());
    }
}
