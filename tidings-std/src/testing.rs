//! Testing utilities for Tidings.
//!
//! This module provides helpers for asserting what handlers ran, in which
//! order, and with which parameters.
//!
//! # Features
//!
//! - [`CallLog`]: An ordered, shareable record of handler invocations
//! - [`RecordingHandler`]: A handler that captures the parameters of every call

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};
use tidings_core::{EventContext, Handler, Parameters, Value};

// ============================================================================
// Call Log
// ============================================================================

/// An ordered record of labelled handler calls.
///
/// # Example
///
/// ```rust,ignore
/// let log = CallLog::new();
/// router.on("e").priority(200).call(log.handler("high"));
/// router.on("e").priority(100).call(log.handler("low"));
///
/// router.emit("e", ());
/// assert_eq!(log.entries(), vec!["high", "low"]);
/// ```
#[derive(Clone, Default, Debug)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry.
    pub fn record(&self, label: impl Into<String>) {
        self.lock().push(label.into());
    }

    /// A sync handler that records `label` and returns no output.
    pub fn handler(&self, label: impl Into<String>) -> Handler {
        let log = self.clone();
        let label = label.into();
        Handler::new_sync(move |_| {
            log.record(label.clone());
            Ok(None)
        })
    }

    /// An async handler that records `label` and returns no output.
    pub fn async_handler(&self, label: impl Into<String>) -> Handler {
        let log = self.clone();
        let label = label.into();
        Handler::new_async(move |_| {
            let log = log.clone();
            let label = label.clone();
            Box::pin(async move {
                log.record(label);
                Ok(None)
            })
        })
    }

    /// Snapshot of the entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ============================================================================
// Recording Handler
// ============================================================================

/// A handler that records the parameters of every invocation.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = RecordingHandler::new();
/// router.on("save").call(recorder.handler());
///
/// router.apply_sync("save", [("id", 7)])?;
/// assert_eq!(recorder.calls()[0].get_as::<i32>("id"), Some(7));
/// ```
#[derive(Clone, Default, Debug)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<Parameters>>>,
    count: Arc<AtomicUsize>,
    output: Option<Value>,
}

impl RecordingHandler {
    /// Create a recorder that returns no output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder that returns `output` from every call.
    pub fn returning(output: impl Into<Value>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    fn capture(&self, ctx: &EventContext) -> Option<Value> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.parameters().clone());
        self.count.fetch_add(1, Ordering::SeqCst);
        self.output.clone()
    }

    /// A sync handler feeding this recorder.
    pub fn handler(&self) -> Handler {
        let this = self.clone();
        Handler::new_sync(move |ctx| Ok(this.capture(ctx)))
    }

    /// An async handler feeding this recorder.
    pub fn async_handler(&self) -> Handler {
        let this = self.clone();
        Handler::new_async(move |ctx| {
            let this = this.clone();
            Box::pin(async move { Ok(this.capture(ctx)) })
        })
    }

    /// Parameters of every call so far, oldest first.
    pub fn calls(&self) -> Vec<Parameters> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_log_records_in_order() {
        let log = CallLog::new();
        let mut ctx = EventContext::new("e", ());
        log.handler("a").call_sync(&mut ctx);
        log.handler("b").call_sync(&mut ctx);
        assert_eq!(log.entries(), vec!["a", "b"]);
        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_recording_handler_captures_parameters() {
        let recorder = RecordingHandler::returning("ok");
        let mut ctx = EventContext::new("e", [("id", 7)]);
        let out = recorder.async_handler().invoke(&mut ctx).await.unwrap();
        assert_eq!(out, Some(json!("ok")));
        assert_eq!(recorder.count(), 1);
        assert_eq!(recorder.calls()[0].get_as::<i32>("id"), Some(7));
    }
}
