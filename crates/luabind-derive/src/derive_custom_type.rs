//! `#[derive(LuaCustomType)]`: generate `CustomType` for a struct.
//!
//! # Struct attributes
//! - `#[lua(name = "...")]`: registry and script-visible type name
//! - `#[lua(deinit = "method")]`: method run before an instance is dropped
//! - `#[lua_impl(PartialEq, Display)]`: map Rust traits to metamethods
//!
//! # Field attributes
//! - `#[lua(skip)]`: do not expose a `Field<T>` member
//! - `#[lua(name = "...")]`: custom script-visible key

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident};

use crate::type_utils::{is_field_type, normalize_type};

/// Internal field metadata collected during parsing.
struct FieldInfo {
    ident: Ident,
    lua_name: String,
}

/// Struct-level `#[lua(...)]` options.
#[derive(Default)]
struct TypeOptions {
    name: Option<String>,
    deinit: Option<Ident>,
}

/// Traits listed in `#[lua_impl(...)]`.
#[derive(Default)]
struct TraitImpls {
    partial_eq: bool,
    display: bool,
}

/// Entry point for `#[derive(LuaCustomType)]`.
pub fn derive_custom_type_impl(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "LuaCustomType cannot be derived for generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "LuaCustomType can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "LuaCustomType can only be derived for structs",
            ));
        }
    };

    let options = parse_type_options(&input)?;
    let trait_impls = parse_lua_impl_attrs(&input)?;

    let mut field_infos: Vec<FieldInfo> = Vec::new();
    for field in fields.iter() {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };

        let mut skip = false;
        let mut lua_name: Option<String> = None;
        for attr in &field.attrs {
            if !attr.path().is_ident("lua") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else if meta.path.is_ident("name") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    lua_name = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `name = \"...\"`"))
                }
            })?;
        }

        if !is_field_type(&field.ty) {
            if lua_name.is_some() {
                return Err(syn::Error::new_spanned(
                    &field.ty,
                    format!(
                        "only Field<T> members are visible to scripts, found `{}`",
                        normalize_type(&field.ty)
                    ),
                ));
            }
            continue;
        }
        if skip {
            continue;
        }

        let lua_name = lua_name.unwrap_or_else(|| ident.to_string());
        if field_infos.iter().any(|f| f.lua_name == lua_name) {
            return Err(syn::Error::new_spanned(
                ident,
                format!("duplicate script-visible field name `{lua_name}`"),
            ));
        }
        field_infos.push(FieldInfo {
            ident: ident.clone(),
            lua_name,
        });
    }

    let type_name = options.name.unwrap_or_else(|| name.to_string());

    let declarations = field_infos.iter().map(|f| {
        let ident = &f.ident;
        let lua_name = &f.lua_name;
        quote! { fields.field(#lua_name, |this: &Self| &this.#ident); }
    });

    let eq_hook = if trait_impls.partial_eq {
        quote! {
            fn eq_hook() -> ::core::option::Option<fn(&Self, &Self) -> bool> {
                fn equals(lhs: &#name, rhs: &#name) -> bool {
                    ::core::cmp::PartialEq::eq(lhs, rhs)
                }
                ::core::option::Option::Some(equals)
            }
        }
    } else {
        quote! {}
    };

    let display_hook = if trait_impls.display {
        quote! {
            fn display_hook() -> ::core::option::Option<fn(&Self) -> ::std::string::String> {
                fn display(this: &#name) -> ::std::string::String {
                    ::std::string::ToString::to_string(this)
                }
                ::core::option::Option::Some(display)
            }
        }
    } else {
        quote! {}
    };

    let deinitialize = match &options.deinit {
        Some(method) => quote! {
            fn deinitialize(&mut self) {
                self.#method();
            }
        },
        None => quote! {},
    };

    Ok(quote! {
        impl ::luabind::CustomType for #name {
            fn type_name() -> &'static str {
                #type_name
            }

            #[allow(unused_variables)]
            fn declare_fields(fields: &mut ::luabind::FieldSet<Self>) {
                #(#declarations)*
            }

            #eq_hook
            #display_hook
            #deinitialize
        }
    })
}

fn parse_type_options(input: &DeriveInput) -> syn::Result<TypeOptions> {
    let mut options = TypeOptions::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("lua") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: syn::LitStr = meta.value()?.parse()?;
                if lit.value().is_empty() {
                    return Err(syn::Error::new_spanned(lit, "type name must not be empty"));
                }
                options.name = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("deinit") {
                let lit: syn::LitStr = meta.value()?.parse()?;
                options.deinit = Some(lit.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"` or `deinit = \"...\"`"))
            }
        })?;
    }
    Ok(options)
}

/// Parse `#[lua_impl(PartialEq, Display)]`.
fn parse_lua_impl_attrs(input: &DeriveInput) -> syn::Result<TraitImpls> {
    let mut impls = TraitImpls::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("lua_impl") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("PartialEq") {
                impls.partial_eq = true;
                Ok(())
            } else if meta.path.is_ident("Display") {
                impls.display = true;
                Ok(())
            } else {
                Err(meta.error("expected `PartialEq` or `Display`"))
            }
        })?;
    }
    Ok(impls)
}
