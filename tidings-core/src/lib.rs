//! # tidings-core
//!
//! Core types for the Tidings event dispatch framework.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! components that only register handlers or inspect contexts, without pulling
//! in the router, the background loop or the lifecycle machinery from
//! `tidings-std`.
//!
//! # The Handler Protocol
//!
//! Components never reference each other directly. They register [`Handler`]s
//! against named events, and callers later dispatch those events. Every
//! dispatch creates exactly one [`EventContext`], which carries:
//!
//! - **Parameters**: the caller's keyword arguments ([`Parameters`])
//! - **Output**: overwritten by each handler that returns a value, so earlier
//!   handlers hand results to later ones through the context alone
//! - **Exception**: the most recent captured failure ([`HandlerFailure`])
//! - **Stop flag**: once set, the chain halts after the current handler
//!
//! # Error Types
//!
//! - [`HandlerError`] - Returned by handler bodies (chain-stop signal or failure)
//! - [`HandlerFailure`] - A recorded failure living on the context
//! - [`DispatchError`] - The few failures a blocking caller can observe

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod context;
mod error;
mod handler;
mod params;

// Re-exports
pub use context::EventContext;
pub use error::{BoxError, DispatchError, HandlerError, HandlerFailure, HandlerPanic};
pub use handler::{AsyncHandlerFn, Handler, HandlerId, HandlerResult, Predicate, SyncHandlerFn};
pub use params::Parameters;

/// JSON value type used for parameters and output.
pub use serde_json::Value;

/// Default handler priority used by `on()` when none is given.
pub const DEFAULT_PRIORITY: i32 = 100;
