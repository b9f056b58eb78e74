use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote, quote_spanned};
use syn::{DeriveInput, Index, Type, parse_macro_input};

/// Implements `fxvm::FxType` for a struct whose fields all implement it.
///
/// Fields are packed in declaration order, matching `TypeLayout::structure`.
#[proc_macro_derive(FxType)]
pub fn derive_fx_type(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let name_str = name.to_string();

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let str = match input.data {
        syn::Data::Struct(s) => s,
        _ => {
            return quote_spanned! {
                Span::call_site() =>
                compile_error!("FxType can only be derived for struct types");
            }
            .into();
        }
    };

    // (layout name, accessor, binding, type)
    let fields: Vec<(String, TokenStream, TokenStream, &Type)> = match &str.fields {
        syn::Fields::Named(fields) => fields
            .named
            .iter()
            .filter_map(|x| x.ident.as_ref().map(|ident| (ident, &x.ty)))
            .map(|(ident, ty)| {
                let binding = format_ident!("__{}", ident);
                (ident.to_string(), quote! { #ident }, quote! { #binding }, ty)
            })
            .collect(),

        syn::Fields::Unnamed(fields) => fields
            .unnamed
            .iter()
            .enumerate()
            .map(|(id, x)| {
                let index = Index::from(id);
                let binding = format_ident!("__{}", id);
                (id.to_string(), quote! { #index }, quote! { #binding }, &x.ty)
            })
            .collect(),

        syn::Fields::Unit => Vec::new(),
    };

    let layout_fields = fields.iter().map(|(field, _, _, ty)| {
        quote! { (#field, <#ty as fxvm::FxType>::layout()) }
    });

    let read_fields = fields.iter().map(|(_, _, binding, ty)| {
        quote! {
            let #binding = <#ty as fxvm::FxType>::read(&bytes[offset..]);
            offset += fxvm::sizeof::<#ty>() as usize;
        }
    });

    let write_fields = fields.iter().map(|(_, accessor, _, ty)| {
        quote! {
            <#ty as fxvm::FxType>::write(&self.#accessor, &mut bytes[offset..]);
            offset += fxvm::sizeof::<#ty>() as usize;
        }
    });

    let bindings = fields.iter().map(|(_, _, binding, _)| binding);
    let construct = match &str.fields {
        syn::Fields::Named(_) => {
            let accessors = fields.iter().map(|(_, accessor, _, _)| accessor);
            quote! { Self { #(#accessors: #bindings),* } }
        }
        syn::Fields::Unnamed(_) => quote! { Self(#(#bindings),*) },
        syn::Fields::Unit => quote! { Self },
    };

    quote! {
        impl #impl_generics fxvm::FxType for #name #ty_generics #where_clause {
            fn layout() -> fxvm::TypeLayout {
                let fields: ::std::vec::Vec<(&str, fxvm::TypeLayout)> = ::std::vec![#(#layout_fields),*];
                fxvm::TypeLayout::structure(#name_str, fields)
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn read(bytes: &[u8]) -> Self {
                let mut offset = 0usize;
                #(#read_fields)*
                #construct
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn write(&self, bytes: &mut [u8]) {
                let mut offset = 0usize;
                #(#write_fields)*
            }
        }
    }
    .into()
}
