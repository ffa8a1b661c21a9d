//! Implementation of `#[derive(Protectable)]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    ext::IdentExt, parse2, Attribute, Data, DeriveInput, Error, Fields, GenericArgument, Ident,
    Meta, PathArguments, Result, Type,
};

/// How a field takes part in the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Mandatory,
    Optional,
    Nested,
}

pub fn expand(input: TokenStream) -> Result<TokenStream> {
    let input: DeriveInput = parse2(input)?;
    let ident = &input.ident;
    let type_name = ident.unraw().to_string();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(Error::new_spanned(
                    ident,
                    "Protectable can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(Error::new_spanned(
                ident,
                "Protectable can only be derived for structs",
            ))
        }
    };

    let mut text = Vec::new();
    let mut nested = Vec::new();

    for field in fields {
        let Some(kind) = field_kind(&field.attrs)? else {
            continue;
        };
        // Named fields always carry an ident.
        let Some(field_ident) = &field.ident else {
            continue;
        };
        let name = field_ident.unraw().to_string();

        match kind {
            FieldKind::Mandatory => text.push(quote! {
                ::data_protection::properties::ProtectedField::new(#name, &mut self.#field_ident)
            }),
            FieldKind::Optional => text.push(quote! {
                ::data_protection::properties::ProtectedField::optional(#name, &mut self.#field_ident)
            }),
            FieldKind::Nested => {
                let access = nested_access(&field.ty, field_ident);
                nested.push(quote! {
                    ::data_protection::properties::NestedField::new(#name, #access)
                });
            }
        }
    }

    let nested_fn = if nested.is_empty() {
        TokenStream::new()
    } else {
        quote! {
            fn nested_fields(&mut self) -> ::std::vec::Vec<::data_protection::properties::NestedField<'_>> {
                ::std::vec![#(#nested),*]
            }
        }
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::data_protection::properties::Protectable for #ident #ty_generics #where_clause {
            fn type_name(&self) -> &'static str {
                #type_name
            }

            #nested_fn

            fn protected_fields(&mut self) -> ::std::vec::Vec<::data_protection::properties::ProtectedField<'_>> {
                ::std::vec![#(#text),*]
            }
        }
    })
}

/// Read the `#[protect]` attribute of a field, if any.
fn field_kind(attrs: &[Attribute]) -> Result<Option<FieldKind>> {
    let mut found: Option<(FieldKind, &Attribute)> = None;

    for attr in attrs.iter().filter(|a| a.path().is_ident("protect")) {
        if let Some((_, first)) = found {
            let mut err = Error::new_spanned(attr, "duplicate #[protect] attribute");
            err.combine(Error::new_spanned(first, "first #[protect] here"));
            return Err(err);
        }

        let kind = match &attr.meta {
            Meta::Path(_) => FieldKind::Mandatory,
            Meta::List(_) => {
                let mut optional = false;
                let mut is_nested = false;
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("optional") {
                        optional = true;
                        Ok(())
                    } else if meta.path.is_ident("nested") {
                        is_nested = true;
                        Ok(())
                    } else {
                        Err(meta.error("unknown option. Expected: optional, nested"))
                    }
                })?;
                match (optional, is_nested) {
                    (true, true) => {
                        return Err(Error::new_spanned(
                            attr,
                            "`optional` and `nested` cannot be combined",
                        ))
                    }
                    (true, false) => FieldKind::Optional,
                    (false, true) => FieldKind::Nested,
                    (false, false) => FieldKind::Mandatory,
                }
            }
            Meta::NameValue(nv) => {
                return Err(Error::new_spanned(
                    nv,
                    "expected #[protect], #[protect(optional)] or #[protect(nested)]",
                ))
            }
        };
        found = Some((kind, attr));
    }

    Ok(found.map(|(kind, _)| kind))
}

/// Expression yielding `Option<&mut dyn Protectable>` for a nested field.
fn nested_access(ty: &Type, field: &Ident) -> TokenStream {
    let dyn_ty = quote!(&mut dyn ::data_protection::properties::Protectable);

    match single_type_arg(ty, "Option") {
        Some(inner) if single_type_arg(inner, "Box").is_some() => quote! {
            self.#field.as_deref_mut().map(|v| v as #dyn_ty)
        },
        Some(_) => quote! {
            self.#field.as_mut().map(|v| v as #dyn_ty)
        },
        None if single_type_arg(ty, "Box").is_some() => quote! {
            ::std::option::Option::Some(&mut *self.#field as #dyn_ty)
        },
        None => quote! {
            ::std::option::Option::Some(&mut self.#field as #dyn_ty)
        },
    }
}

/// `Some(T)` if `ty` is `wrapper<T>` (matched on the last path segment).
fn single_type_arg<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    if path.qself.is_some() {
        return None;
    }
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}
