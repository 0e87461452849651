//! Procedural macros for luabind custom types.
//!
//! Provides `#[derive(LuaCustomType)]`, which implements `luabind::CustomType`
//! for a struct and exposes its `Field<T>` members to scripts.
//!
//! # Attributes
//!
//! - `#[lua(name = "...")]` on the struct: the name scripts and the registry see
//! - `#[lua(deinit = "method")]` on the struct: a `fn(&mut self)` run when the
//!   VM collects an instance
//! - `#[lua(skip)]` on a field: keep a `Field<T>` member host-only
//! - `#[lua(name = "...")]` on a field: use a custom script-visible key
//!
//! # Trait mapping
//!
//! `#[lua_impl(...)]` on the struct maps Rust traits to metamethods:
//! - `PartialEq` → `__eq`
//! - `Display` → `__tostring`
//!
//! # Example
//!
//! ```ignore
//! use luabind::{Field, LuaCustomType};
//!
//! #[derive(LuaCustomType, PartialEq)]
//! #[lua(name = "Note")]
//! #[lua_impl(PartialEq)]
//! struct Note {
//!     name: Field<String>,
//!     #[lua(skip)]
//!     revision: Field<i64>,
//! }
//! ```

mod derive_custom_type;
mod type_utils;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derive `CustomType` for a struct with named fields.
///
/// Only members whose type is `Field<T>` are exposed; everything else stays
/// private to the host.
#[proc_macro_derive(LuaCustomType, attributes(lua, lua_impl))]
pub fn derive_lua_custom_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_custom_type::derive_custom_type_impl(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
