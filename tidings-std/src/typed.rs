//! Typed dispatch.
//!
//! `apply_typed` and `apply_typed_sync` take a parameter type `P` and an
//! output type `R`. The caller's parameters are materialized into `P` when
//! they deserialize cleanly; otherwise handlers see only the raw map. `R` is
//! a decoding hint for the caller, not something handlers are held to.
//!
//! An `"output"` key in the parameters pre-seeds the context output and is
//! not passed on to handlers.

use serde::de::DeserializeOwned;
use std::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
use tidings_core::{EventContext, Parameters};

/// Parameter key that seeds the output of a typed dispatch.
pub const OUTPUT_KEY: &str = "output";

/// The result of a typed dispatch: an [`EventContext`] plus its declared
/// parameter and output types.
pub struct TypedContext<P, R> {
    ctx: EventContext,
    _types: PhantomData<fn() -> (P, R)>,
}

impl<P, R> TypedContext<P, R>
where
    P: 'static,
    R: DeserializeOwned,
{
    pub(crate) fn new(ctx: EventContext) -> Self {
        Self {
            ctx,
            _types: PhantomData,
        }
    }

    /// The materialized parameters, or `None` if the raw map was passed.
    pub fn typed_parameters(&self) -> Option<&P> {
        self.ctx.typed_parameters::<P>()
    }

    /// The output decoded as `R`.
    pub fn typed_output(&self) -> Option<R> {
        self.ctx.output_as::<R>()
    }

    /// Unwrap into the plain context.
    pub fn into_inner(self) -> EventContext {
        self.ctx
    }
}

impl<P, R> Deref for TypedContext<P, R> {
    type Target = EventContext;

    fn deref(&self) -> &EventContext {
        &self.ctx
    }
}

impl<P, R> DerefMut for TypedContext<P, R> {
    fn deref_mut(&mut self) -> &mut EventContext {
        &mut self.ctx
    }
}

impl<P, R> fmt::Debug for TypedContext<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedContext")
            .field("params_type", &std::any::type_name::<P>())
            .field("output_type", &std::any::type_name::<R>())
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// Build the context of a typed dispatch.
pub(crate) fn prepare<P>(event: &str, mut params: Parameters, trace: bool) -> EventContext
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    let seed = params.remove(OUTPUT_KEY);
    let typed = params.materialize::<P>();
    let mut ctx = EventContext::new(event, params);

    match typed {
        Ok(typed) => ctx.set_typed_parameters(typed),
        Err(err) => {
            if trace {
                tracing::debug!(
                    event,
                    params_type = std::any::type_name::<P>(),
                    error = %err,
                    "parameters did not materialize, passing raw map"
                );
            }
        }
    }
    if seed.is_some() {
        ctx.output = seed;
    }
    ctx
}
