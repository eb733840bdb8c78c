//! Error types for Tidings.
//!
//! This module provides the error taxonomy of the dispatch core:
//!
//! - [`HandlerError`] - What a handler body returns on the unhappy path: either the
//!   chain-stop signal or an ordinary failure
//! - [`HandlerFailure`] - A cloneable, recorded failure stored on the
//!   [`EventContext`](crate::EventContext)
//! - [`DispatchError`] - Errors surfaced to callers of blocking dispatch
//! - [`HandlerPanic`] - A panic caught while running a handler or predicate

use std::{any::Any, fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to the caller of a dispatch method.
///
/// Individual handler failures never show up here; they are recorded on the
/// context. Only the blocking bridge can fail in a way the caller sees.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A blocking caller waited longer than `default_event_timeout` for an
    /// async handler running on the background loop.
    #[error("handler for event `{event}` timed out after {timeout:?}")]
    Timeout {
        /// The event being dispatched.
        event: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The background loop could not be started or has gone away.
    #[error("background loop unavailable: {0}")]
    BridgeUnavailable(String),

    /// A blocking dispatch was issued from the background loop thread itself.
    #[error("blocking dispatch issued from the background loop thread")]
    BridgeReentered,
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Timeout { .. } => "dispatch_timeout",
            DispatchError::BridgeUnavailable(_) => "dispatch_bridge_unavailable",
            DispatchError::BridgeReentered => "dispatch_bridge_reentered",
        }
    }

    /// True for the timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }
}

/// The error half of a [`HandlerResult`](crate::HandlerResult).
///
/// `HandlerError` deliberately does not implement [`std::error::Error`], so any
/// error type converts into it with `?`.
pub enum HandlerError {
    /// Chain-stop signal raised by
    /// [`EventContext::stop_with_output`](crate::EventContext::stop_with_output).
    /// The dispatch loop swallows it and ends the chain cleanly.
    Stop,
    /// An ordinary handler failure.
    Failed(BoxError),
}

impl HandlerError {
    /// Build a failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        HandlerError::Failed(message.into())
    }

    /// Returns true if this is the chain-stop signal.
    pub fn is_stop(&self) -> bool {
        matches!(self, HandlerError::Stop)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::Failed(Box::new(err))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Stop => f.write_str("Stop"),
            HandlerError::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Stop => f.write_str("handler chain stopped"),
            HandlerError::Failed(err) => write!(f, "handler failed: {err}"),
        }
    }
}

/// A failure captured during dispatch.
///
/// Cheap to clone; the same failure can sit on the context and be re-raised by
/// the handler that recorded it.
#[derive(Clone)]
pub struct HandlerFailure(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl HandlerFailure {
    /// Wrap an error. A boxed `HandlerFailure` is unwrapped rather than nested.
    pub fn new(err: impl Into<BoxError>) -> Self {
        let boxed: BoxError = err.into();
        match boxed.downcast::<HandlerFailure>() {
            Ok(failure) => *failure,
            Err(other) => Self(Arc::from(other)),
        }
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Attempt to downcast the underlying error.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns true if the underlying error is of type `T`.
    pub fn is<T: std::error::Error + 'static>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for HandlerFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// A panic caught while running a handler or evaluating a predicate.
#[derive(Error, Debug, Clone)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

impl HandlerPanic {
    /// Build from the payload returned by `catch_unwind`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerPanic(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_any_error_converts_with_question_mark() {
        fn body() -> Result<(), HandlerError> {
            Err::<(), _>(Boom)?;
            Ok(())
        }
        match body() {
            Err(HandlerError::Failed(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_is_not_double_wrapped() {
        let failure = HandlerFailure::new(Boom);
        let again = HandlerFailure::new(failure.clone());
        assert!(again.is::<Boom>());
        assert_eq!(again.to_string(), "boom");
    }

    #[test]
    fn test_panic_payloads() {
        let p = HandlerPanic::from_payload(Box::new("static"));
        assert_eq!(p.0, "static");
        let p = HandlerPanic::from_payload(Box::new(String::from("owned")));
        assert_eq!(p.0, "owned");
        let p = HandlerPanic::from_payload(Box::new(42_u8));
        assert_eq!(p.0, "non-string panic payload");
    }

    #[test]
    fn test_dispatch_error_labels() {
        let err = DispatchError::Timeout {
            event: "e".into(),
            timeout: Duration::from_millis(5),
        };
        assert!(err.is_timeout());
        assert_eq!(err.as_label(), "dispatch_timeout");
        assert_eq!(DispatchError::BridgeReentered.as_label(), "dispatch_bridge_reentered");
    }
}
