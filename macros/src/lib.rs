extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Fields, Ident, ItemEnum};

#[proc_macro_derive(AllVariants)]
pub fn all_variants_derive(input: TokenStream) -> TokenStream {
    let enum_ = parse_macro_input!(input as ItemEnum);
    let ident = enum_.ident;
    let variant_count = enum_.variants.len();

    let mut all_variants = quote! {};
    for variant in enum_.variants {
        let variant_ident = variant.ident;
        all_variants.extend(quote! { Self::#variant_ident, });
    }

    quote! {
        impl #ident {
            pub const ALL: [Self; #variant_count] = [#all_variants];
        }
    }
    .into()
}

#[proc_macro_derive(NumVariants)]
pub fn num_variants_derive(input: TokenStream) -> TokenStream {
    let enum_ = parse_macro_input!(input as ItemEnum);
    let num_variants = enum_.variants.len();
    let ident = enum_.ident;

    quote! {
        impl #ident {
            pub const VARIANT_COUNT: usize = #num_variants;
        }
    }
    .into()
}

/// Generates a field-less twin of an enum, named by `#[enum_kind(Name)]`,
/// together with a `kind()` accessor on the original.
#[proc_macro_derive(EnumKind, attributes(enum_kind))]
pub fn enumkind_derive(input: TokenStream) -> TokenStream {
    let enum_ = parse_macro_input!(input as ItemEnum);

    let enum_ident = enum_.ident;
    let Some(attr) = enum_.attrs.iter().find(|attr| attr.path().is_ident("enum_kind")) else {
        return syn::Error::new_spanned(&enum_ident, "expected #[enum_kind(Name)] attribute")
            .to_compile_error()
            .into();
    };
    let new_ident: Ident = match attr.parse_args() {
        Ok(ident) => ident,
        Err(err) => return err.to_compile_error().into(),
    };

    let vis = enum_.vis;
    let mut new_variants = quote! {};
    let mut from_branches = quote! {};
    for variant in enum_.variants {
        let ident = variant.ident;
        new_variants.extend(quote! { #ident, });
        let pattern = match variant.fields {
            Fields::Unit => quote! { #enum_ident::#ident },
            Fields::Unnamed(_) => quote! { #enum_ident::#ident(..) },
            Fields::Named(_) => quote! { #enum_ident::#ident { .. } },
        };
        from_branches.extend(quote! { #pattern => #new_ident::#ident, });
    }

    quote! {
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        #vis enum #new_ident {
            #new_variants
        }

        impl From<&#enum_ident> for #new_ident {
            fn from(from: &#enum_ident) -> #new_ident {
                match from {
                    #from_branches
                }
            }
        }

        impl From<#enum_ident> for #new_ident {
            fn from(from: #enum_ident) -> #new_ident {
                #new_ident::from(&from)
            }
        }

        impl #enum_ident {
            pub fn kind(&self) -> #new_ident {
                #new_ident::from(self)
            }
        }
    }
    .into()
}
