//! Procedural macros for Tidings.
//!
//! - `#[handlers]` - Attribute macro on an `impl` block that implements
//!   `RegisterHandlers` from the `#[on(...)]`-tagged methods inside it

use proc_macro::TokenStream;
use syn::{ItemImpl, parse_macro_input};

mod handlers;

/// Implement `RegisterHandlers` for a type from its tagged methods.
///
/// Each method tagged with `#[on(...)]` is registered when the component is
/// attached to a router. A method may carry several `#[on]` tags.
///
/// # Arguments of `#[on]`
///
/// - one or more event names (string literals), required
/// - `priority = N`: higher runs first (default 100)
/// - `when = path`: a `fn(&EventContext) -> bool` guard
///
/// # Accepted methods
///
/// ```rust,ignore
/// fn name(&self, ctx: &mut EventContext) -> HandlerResult
/// async fn name(&self, ctx: &mut EventContext) -> HandlerResult
/// fn name(ctx: &mut EventContext) -> HandlerResult
/// async fn name(ctx: &mut EventContext) -> HandlerResult
/// ```
///
/// # Example
///
/// ```rust,ignore
/// struct Cache {
///     hits: AtomicUsize,
/// }
///
/// #[tidings::handlers]
/// impl Cache {
///     #[on("lookup", priority = 200, when = has_key)]
///     fn lookup(&self, ctx: &mut EventContext) -> HandlerResult {
///         self.hits.fetch_add(1, Ordering::Relaxed);
///         ctx.stop_with_output("cached")
///     }
///
///     #[on("lookup:miss", "evict")]
///     async fn refresh(&self, ctx: &mut EventContext) -> HandlerResult {
///         Ok(None)
///     }
/// }
///
/// let router = EventRouter::new().with_handlers(Arc::new(Cache::default()));
/// ```
#[proc_macro_attribute]
pub fn handlers(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[handlers] takes no arguments; tag methods with #[on(...)] instead",
        )
        .to_compile_error()
        .into();
    }
    let input = parse_macro_input!(item as ItemImpl);
    handlers::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
