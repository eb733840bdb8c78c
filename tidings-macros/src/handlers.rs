//! Expansion of `#[handlers]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    Attribute, Expr, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitInt, LitStr, Token,
    parse::{Parse, ParseStream},
};

/// Arguments of one `#[on(...)]` tag.
struct OnArgs {
    events: Vec<LitStr>,
    priority: Option<i32>,
    when: Option<Expr>,
}

impl Parse for OnArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut events = Vec::new();
        let mut priority = None;
        let mut when = None;

        while input.peek(LitStr) {
            events.push(input.parse::<LitStr>()?);
            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }
        if events.is_empty() {
            return Err(input.error("expected at least one event name, e.g. #[on(\"user:login\")]"));
        }

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "priority" => {
                    let lit: LitInt = input.parse()?;
                    priority = Some(lit.base10_parse()?);
                }
                "when" => {
                    let expr: Expr = input.parse()?;
                    when = Some(expr);
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", other),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(OnArgs {
            events,
            priority,
            when,
        })
    }
}

fn is_on(attr: &Attribute) -> bool {
    attr.path().is_ident("on")
}

/// Strip the `#[on]` tags from `method` and return their parsed arguments.
fn take_tags(method: &mut ImplItemFn) -> syn::Result<Vec<OnArgs>> {
    let mut tags = Vec::new();
    for attr in method.attrs.iter().filter(|a| is_on(a)) {
        tags.push(attr.parse_args::<OnArgs>()?);
    }
    method.attrs.retain(|a| !is_on(a));
    Ok(tags)
}

/// Build the `Handler` value for one tagged method.
fn handler_for(method: &ImplItemFn) -> syn::Result<TokenStream> {
    let sig = &method.sig;
    let name = &sig.ident;
    let has_receiver = matches!(sig.inputs.first(), Some(FnArg::Receiver(_)));
    let typed_args = sig
        .inputs
        .iter()
        .filter(|arg| matches!(arg, FnArg::Typed(_)))
        .count();

    if typed_args != 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "handler methods take exactly one argument: `ctx: &mut EventContext`",
        ));
    }
    if let Some(FnArg::Receiver(receiver)) = sig.inputs.first() {
        if receiver.reference.is_none() || receiver.mutability.is_some() {
            return Err(syn::Error::new_spanned(
                receiver,
                "handler methods must take `&self`",
            ));
        }
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "handler methods cannot be generic",
        ));
    }

    let handler = match (sig.asyncness.is_some(), has_receiver) {
        (false, true) => quote! {
            {
                let this = ::std::sync::Arc::clone(&self);
                ::tidings::Handler::new_sync(move |ctx| this.#name(ctx))
            }
        },
        (false, false) => quote! {
            ::tidings::Handler::new_sync(|ctx| Self::#name(ctx))
        },
        (true, true) => quote! {
            {
                let this = ::std::sync::Arc::clone(&self);
                ::tidings::Handler::new_async(move |ctx| {
                    let this = ::std::sync::Arc::clone(&this);
                    ::std::boxed::Box::pin(async move { this.#name(ctx).await })
                })
            }
        },
        (true, false) => quote! {
            ::tidings::Handler::new_async(|ctx| ::std::boxed::Box::pin(Self::#name(ctx)))
        },
    };
    Ok(handler)
}

fn registrations(tags: &[OnArgs]) -> TokenStream {
    let calls = tags.iter().flat_map(|tag| {
        let priority = match tag.priority {
            Some(p) => quote! { #p },
            None => quote! { ::tidings::DEFAULT_PRIORITY },
        };
        let when = tag.when.as_ref().map(|expr| quote! { .when(#expr) });
        tag.events.iter().map(move |event| {
            quote! {
                router
                    .on(#event)
                    .priority(#priority)
                    #when
                    .call(::core::clone::Clone::clone(&handler));
            }
        })
    });
    quote! { #(#calls)* }
}

pub(crate) fn expand(mut input: ItemImpl) -> syn::Result<TokenStream> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[handlers] goes on an inherent impl block, not a trait impl",
        ));
    }

    let mut blocks = Vec::new();
    for item in &mut input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        let tags = take_tags(method)?;
        if tags.is_empty() {
            continue;
        }
        let handler = handler_for(method)?;
        let calls = registrations(&tags);
        blocks.push(quote! {
            {
                let handler = #handler;
                #calls
            }
        });
    }

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        #input

        impl #impl_generics ::tidings::RegisterHandlers for #self_ty #where_clause {
            fn register_handlers(
                self: ::std::sync::Arc<Self>,
                router: &::tidings::EventRouter,
            ) {
                #(#blocks)*
                let _ = &self;
                let _ = router;
            }
        }
    })
}
