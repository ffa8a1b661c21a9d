//! Procedural macros for the data-protection crate.
//!
//! This crate provides `#[derive(Protectable)]`. Use it through the
//! `data_protection` re-export rather than depending on it directly.

mod protectable;

use proc_macro::TokenStream;

/// Implements `data_protection::Protectable` for a struct with named fields.
///
/// # Field attributes
///
/// - `#[protect]` - a `String` or `Option<String>` that must hold ciphertext
///   at rest. Unprotecting a plain-text value is an error.
/// - `#[protect(optional)]` - as above, but a value that fails
///   authentication is assumed to be plain text and left as-is.
/// - `#[protect(nested)]` - a field whose own marked fields are processed.
///   Accepts `T`, `Box<T>`, `Option<T>` and `Option<Box<T>>` where
///   `T: Protectable`.
///
/// Unmarked fields are never read or written.
///
/// # Example
///
/// ```ignore
/// use data_protection::Protectable;
///
/// #[derive(Protectable)]
/// struct AppSettings {
///     name: String,
///     #[protect]
///     api_key: String,
///     #[protect(optional)]
///     legacy_token: Option<String>,
///     #[protect(nested)]
///     smtp: Option<SmtpSettings>,
/// }
/// ```
#[proc_macro_derive(Protectable, attributes(protect))]
pub fn derive_protectable(input: TokenStream) -> TokenStream {
    protectable::expand(input.into())
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
