//! # Event Context
//!
//! One [`EventContext`] is created per dispatch call and flows, unmodified in
//! identity, through every handler of that dispatch. It carries:
//!
//! - the caller's [`Parameters`] (read-only by convention)
//! - the accumulating `output`, overwritten by each handler that returns a value
//! - the most recent captured `exception`
//! - the stop flag that ends the handler chain after the current handler
//!
//! A context is never shared between concurrent dispatches and never reused.

use crate::{
    error::{BoxError, HandlerError, HandlerFailure},
    handler::HandlerResult,
    params::Parameters,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{any::Any, fmt, sync::Arc};

/// Per-dispatch state handed to every handler.
pub struct EventContext {
    event: String,
    parameters: Parameters,
    typed_parameters: Option<Arc<dyn Any + Send + Sync>>,
    /// The accumulated output. Each handler's non-`None` return value replaces it.
    pub output: Option<Value>,
    /// The most recent handler failure, if any.
    pub exception: Option<HandlerFailure>,
    should_stop: bool,
    invocation_timestamp: Option<DateTime<Utc>>,
}

impl EventContext {
    /// Create a context for `event`, stamped with the current time.
    pub fn new(event: impl Into<String>, parameters: impl Into<Parameters>) -> Self {
        Self {
            event: event.into(),
            parameters: parameters.into(),
            typed_parameters: None,
            output: None,
            exception: None,
            should_stop: false,
            invocation_timestamp: Some(Utc::now()),
        }
    }

    /// The event name being dispatched.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The caller-supplied parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Shorthand for `parameters().get(key)`.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Shorthand for `parameters().get_as(key)`.
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters.get_as(key)
    }

    /// The materialized parameter struct of a typed dispatch.
    ///
    /// `None` when the dispatch was untyped, when `P` is not the declared type,
    /// or when materialization failed and the raw map was passed instead.
    pub fn typed_parameters<P: Any>(&self) -> Option<&P> {
        self.typed_parameters
            .as_deref()
            .and_then(|p| p.downcast_ref::<P>())
    }

    /// Attach a materialized parameter struct. Used by typed dispatch.
    pub fn set_typed_parameters<P: Any + Send + Sync>(&mut self, typed: P) {
        self.typed_parameters = Some(Arc::new(typed));
    }

    /// Borrow the current output.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Decode the current output. `None` when unset or of a different shape.
    pub fn output_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.output
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Overwrite the output.
    pub fn set_output(&mut self, value: impl Into<Value>) {
        self.output = Some(value.into());
    }

    /// Returns true once a handler has asked the chain to stop.
    pub fn should_stop(&self) -> bool {
        self.should_stop
    }

    /// Wall-clock time the dispatch began.
    pub fn invocation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.invocation_timestamp
    }

    /// Set the output, set the stop flag and return the chain-stop signal.
    ///
    /// ```rust,ignore
    /// router.on("lookup").handle(move |ctx| {
    ///     if let Some(hit) = cache.get(ctx.param("key")) {
    ///         return ctx.stop_with_output(hit);
    ///     }
    ///     Ok(None)
    /// });
    /// ```
    pub fn stop_with_output(&mut self, value: impl Into<Value>) -> HandlerResult {
        self.output = Some(value.into());
        self.should_stop = true;
        Err(HandlerError::Stop)
    }

    /// Record a failure and set the stop flag without raising.
    ///
    /// The returned failure can be re-raised with `Err(failure.into())`.
    pub fn stop_with_exception(&mut self, err: impl Into<BoxError>) -> HandlerFailure {
        let failure = HandlerFailure::new(err);
        self.exception = Some(failure.clone());
        self.should_stop = true;
        failure
    }

    /// Record a failure without touching the stop flag. Used by dispatch loops.
    pub fn record_failure(&mut self, failure: HandlerFailure) {
        self.exception = Some(failure);
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("parameters", &self.parameters)
            .field("typed", &self.typed_parameters.is_some())
            .field("output", &self.output)
            .field("exception", &self.exception)
            .field("should_stop", &self.should_stop)
            .field("invocation_timestamp", &self.invocation_timestamp)
            .finish()
    }
}
