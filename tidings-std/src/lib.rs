//! # tidings-std
//!
//! Standard implementations for the Tidings event dispatch framework.
//!
//! This crate provides:
//! - **Routing**: [`EventRouter`], [`HandlerRegistry`], the broadcast network
//! - **Bridging**: a lazily started background loop that runs async handlers
//!   for blocking callers, plus outstanding-work `join` / `close`
//! - **Typed dispatch**: [`TypedContext`]
//! - **Lifecycle decorator**: [`Lifecycle`], [`Phases`]
//! - **Shutdown signals**: [`signals`], opt-in per router
//! - **Testing**: [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core types
pub use tidings_core;

// Modules
mod bridge;
pub mod config;
mod dispatch;
pub mod lifecycle;
mod outstanding;
pub mod register;
pub mod registry;
pub mod router;
pub mod signals;
pub mod testing;
pub mod typed;

pub use config::RouterConfig;
pub use lifecycle::{Lifecycle, Phases};
pub use register::RegisterHandlers;
pub use registry::{HandlerRegistration, HandlerRegistry, Registered, ResolvedHandler};
pub use router::{EventRouter, On};
pub use signals::ShutdownRegistry;
pub use typed::TypedContext;
