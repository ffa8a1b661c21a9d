//! Selective protection of marked string fields across an object graph.
//!
//! Types opt in by implementing [`Protectable`], usually through
//! `#[derive(Protectable)]`:
//!
//! ```rust,ignore
//! #[derive(Protectable)]
//! struct Settings {
//!     name: String,                   // never touched
//!     #[protect]
//!     api_key: String,                // must be ciphertext at rest
//!     #[protect(optional)]
//!     smtp_password: Option<String>,  // ciphertext or plain text
//!     #[protect(nested)]
//!     database: Option<DatabaseSettings>,
//! }
//! ```
//!
//! Each object is processed in two passes: nested objects first (depth
//! first, declaration order), then its own marked text fields. The first
//! failure aborts the call; fields already processed stay mutated.

use std::fmt;

use tracing::debug;

use crate::error::{ProtectionError, PropertyProtectionError};
use crate::protector::{Protector, ProtectorExt};

/// Direction of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Protect,
    Unprotect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Protect => f.write_str("protect"),
            Operation::Unprotect => f.write_str("unprotect"),
        }
    }
}

/// A text slot that can hold a marked value.
///
/// Implemented for `String` (empty means absent) and `Option<String>`.
pub trait TextField {
    /// The current value, `None` when absent.
    fn text(&self) -> Option<&str>;
    fn set_text(&mut self, value: String);
}

impl TextField for String {
    fn text(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn set_text(&mut self, value: String) {
        *self = value;
    }
}

impl TextField for Option<String> {
    fn text(&self) -> Option<&str> {
        self.as_deref()
    }

    fn set_text(&mut self, value: String) {
        *self = Some(value);
    }
}

/// A marked text field handed to the walker.
pub struct ProtectedField<'a> {
    pub name: &'static str,
    /// Plain text already present is tolerated when unprotecting.
    pub optional: bool,
    pub value: &'a mut dyn TextField,
}

impl<'a> ProtectedField<'a> {
    pub fn new(name: &'static str, value: &'a mut dyn TextField) -> Self {
        Self {
            name,
            optional: false,
            value,
        }
    }

    pub fn optional(name: &'static str, value: &'a mut dyn TextField) -> Self {
        Self {
            name,
            optional: true,
            value,
        }
    }
}

/// A nested object handed to the walker; `None` when the field is unset.
pub struct NestedField<'a> {
    pub name: &'static str,
    pub value: Option<&'a mut dyn Protectable>,
}

impl<'a> NestedField<'a> {
    pub fn new(name: &'static str, value: Option<&'a mut dyn Protectable>) -> Self {
        Self { name, value }
    }
}

/// An object whose marked fields can be protected in place.
///
/// Only the fields returned here are ever read or written; every other
/// field of the type is left untouched.
pub trait Protectable {
    /// Name reported in [`PropertyProtectionError::containing_type`].
    fn type_name(&self) -> &'static str;

    /// Fields holding nested protectable objects, in declaration order.
    fn nested_fields(&mut self) -> Vec<NestedField<'_>> {
        Vec::new()
    }

    /// Marked text fields, in declaration order.
    fn protected_fields(&mut self) -> Vec<ProtectedField<'_>>;
}

/// Protect every marked, non-empty text field reachable from `object`.
///
/// Returns `protector` so calls can be chained.
///
/// # Errors
///
/// Any failure is wrapped in a [`PropertyProtectionError`] naming the field
/// and its containing type.
pub fn protect_properties<'p, P, T>(
    protector: &'p P,
    object: &mut T,
) -> Result<&'p P, PropertyProtectionError>
where
    P: Protector + ?Sized,
    T: Protectable + ?Sized,
{
    walk(protector, object, Operation::Protect)?;
    Ok(protector)
}

/// Unprotect every marked, non-empty text field reachable from `object`.
///
/// An `optional` field whose value fails to authenticate or parse as
/// protected data is treated as plain text and left unchanged. Every other
/// failure, on any field, is an error.
///
/// Returns `protector` so calls can be chained.
///
/// # Errors
///
/// Any failure is wrapped in a [`PropertyProtectionError`] naming the field
/// and its containing type.
pub fn unprotect_properties<'p, P, T>(
    protector: &'p P,
    object: &mut T,
) -> Result<&'p P, PropertyProtectionError>
where
    P: Protector + ?Sized,
    T: Protectable + ?Sized,
{
    walk(protector, object, Operation::Unprotect)?;
    Ok(protector)
}

fn walk<P, T>(protector: &P, object: &mut T, op: Operation) -> Result<(), PropertyProtectionError>
where
    P: Protector + ?Sized,
    T: Protectable + ?Sized,
{
    let containing_type = object.type_name();

    for field in object.nested_fields() {
        let Some(nested) = field.value else {
            continue;
        };
        walk(protector, nested, op).map_err(|e| {
            PropertyProtectionError::new(
                op,
                field.name,
                containing_type,
                ProtectionError::Property(Box::new(e)),
            )
        })?;
    }

    for field in object.protected_fields() {
        let ProtectedField {
            name,
            optional,
            value,
        } = field;

        let Some(current) = value.text().filter(|s| !s.is_empty()) else {
            continue;
        };

        let replacement = match op {
            Operation::Protect => protector.protect_str(current).map(Some),
            Operation::Unprotect => match protector.unprotect_str(current) {
                Ok(plaintext) => Ok(Some(plaintext)),
                Err(ProtectionError::Crypto(e)) if optional && e.is_payload_failure() => {
                    debug!(
                        field = name,
                        containing_type, "optional field is not protected data; keeping value"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        };

        match replacement {
            Ok(Some(new_value)) => value.set_text(new_value),
            Ok(None) => {}
            Err(cause) => {
                return Err(PropertyProtectionError::new(op, name, containing_type, cause));
            }
        }
    }

    Ok(())
}
