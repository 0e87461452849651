//! Type inspection helpers for the derive macro.

use quote::quote;

/// Normalize a `syn::Type` to a simple string for matching.
///
/// Strips whitespace so `Field < String >` becomes `Field<String>`.
pub fn normalize_type(ty: &syn::Type) -> String {
    quote!(#ty).to_string().replace(' ', "")
}

/// Whether `ty` names `Field<..>`, bare or through a path such as
/// `luabind::Field<..>`.
pub fn is_field_type(ty: &syn::Type) -> bool {
    let syn::Type::Path(path) = ty else {
        return false;
    };
    if path.qself.is_some() {
        return false;
    }
    match path.path.segments.last() {
        Some(segment) => {
            segment.ident == "Field"
                && matches!(segment.arguments, syn::PathArguments::AngleBracketed(_))
        }
        None => false,
    }
}
