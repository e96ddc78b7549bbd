use proc_macro::TokenStream;
use syn_utils::into_macro_output;

#[macro_use]
mod syn_utils;

mod fields_impl;

/// Implements `Fields` and `DeepClone` for a struct with named fields.
///
/// Every field type must implement `FieldValue` and `DeepClone`.
///
/// # Attributes
///
/// | Attribute                         | Target    | Effect                                       |
/// | --------------------------------- | --------- | -------------------------------------------- |
/// | `#[fields(rename = "name")]`      | field     | Exposes the field under a different name     |
/// | `#[fields(skip)]`                 | field     | Hides the field; it is only copied by `Clone` |
/// | `#[fields(crate = "path")]`       | struct    | Path of the `statemix` crate                 |
///
/// # Examples
///
/// ```ignore
/// #[derive(Clone, Fields)]
/// struct Game {
///     score: i64,
///     #[fields(rename = "lv")]
///     level: i64,
/// }
/// ```
#[proc_macro_derive(Fields, attributes(fields))]
pub fn derive_fields(input: TokenStream) -> TokenStream {
    into_macro_output(fields_impl::derive_fields(input.into()))
}
