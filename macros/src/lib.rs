//! Authoring sugar for `weft` systems.
//!
//! `IntoSystemDescriptor` is already implemented for plain `fn`s over
//! `weft::Query` parameter types, so this crate does not need to exist for
//! the scheduler to work. What it adds is the `#[system]` attribute, which
//! lets a function be written against plain references and have them
//! desugar to the `Res`/`ResMut` queries the scheduler actually understands.

extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Pat, Type};

/// Rewrites `&T` / `&mut T` parameters into `weft::Res<T>` / `weft::ResMut<T>`,
/// leaving every other parameter type (already a `Query` impl) untouched.
///
/// The function body is copied verbatim: `Res`/`ResMut` deref to `&T`/`&mut T`
/// so field accesses and method calls on the renamed parameters keep working
/// exactly as they did against the original reference types.
#[proc_macro_attribute]
pub fn system(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut input: ItemFn = parse_macro_input!(input as ItemFn);

    assert!(
        input.sig.generics.params.is_empty(),
        "#[system] functions may not have generic parameters"
    );
    assert!(
        input.sig.asyncness.is_none(),
        "#[system] functions should return `weft::Task<()>` to be async, not be declared `async fn`"
    );

    for arg in &mut input.sig.inputs {
        let pat_ty = match arg {
            FnArg::Typed(ty) => ty,
            FnArg::Receiver(_) => panic!("#[system] functions cannot take a `self` parameter"),
        };

        // Keep the parameter name (needed so the body still compiles unchanged).
        if !matches!(&*pat_ty.pat, Pat::Ident(_)) {
            panic!("#[system] parameters must be simple identifiers");
        }

        if let Type::Reference(reference) = &*pat_ty.ty {
            let elem = &reference.elem;
            let is_mut = reference.mutability.is_some();

            pat_ty.ty = if is_mut {
                Box::new(syn::parse_quote!(weft::ResMut<#elem>))
            } else {
                Box::new(syn::parse_quote!(weft::Res<#elem>))
            };

            // `ResMut`'s write-through is a `DerefMut` impl, which needs a
            // `mut` binding just like the `&mut T` it replaces did.
            if is_mut {
                if let Pat::Ident(ident) = &mut *pat_ty.pat {
                    ident.mutability = Some(syn::token::Mut::default());
                }
            }
        }
        // Any other parameter type is assumed to already implement `weft::Query`.
    }

    let output = quote! { #input };
    output.into()
}
