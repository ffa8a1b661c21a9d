//! Selective field-level protection for configuration and settings objects.
//!
//! A [`Protector`] encrypts and authenticates text under a purpose. The
//! property walker ([`protect_properties`] / [`unprotect_properties`])
//! applies a protector to every field marked `#[protect]` in an object
//! graph, leaving all other fields untouched.
//!
//! ```rust,ignore
//! use data_protection::{DataProtectionProvider, Protectable, ProtectorExt};
//!
//! #[derive(Protectable)]
//! struct SmtpSettings {
//!     host: String,
//!     #[protect]
//!     password: String,
//! }
//!
//! let provider = DataProtectionProvider::ephemeral()?;
//! let protector = provider.create_protector("settings")?;
//! let mut smtp = SmtpSettings { host: "mail".into(), password: "hunter2".into() };
//! protector.protect_properties(&mut smtp)?;
//! protector.unprotect_properties(&mut smtp)?;
//! ```
//!
//! # Crate layout
//!
//! | Module         | Responsibility                                          |
//! |----------------|---------------------------------------------------------|
//! | [`protector`]  | `Protector` trait, provider and key-ring protector      |
//! | [`properties`] | `Protectable` trait and the object property walker      |
//! | [`crypto`]     | AEAD sealing, subkeys, payload format, password keys    |
//! | [`keys`]       | Master key ring, generation, storage, refresh           |
//! | [`config`]     | Options loaded from the environment                     |
//! | [`error`]      | Error types                                             |

// Lets `#[derive(Protectable)]` expand to `::data_protection::...` paths
// inside this crate's own tests.
extern crate self as data_protection;

pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod properties;
pub mod protector;

pub use config::{BlobKeyStorageOptions, DataProtectionOptions};
pub use crypto::PasswordProtector;
pub use error::{CryptoError, PropertyProtectionError, ProtectionError, StorageError};
pub use keys::{refresh_task, KeyManager, KeyRing};
pub use properties::{
    protect_properties, unprotect_properties, NestedField, Operation, Protectable,
    ProtectedField, TextField,
};
pub use protector::{DataProtectionProvider, DataProtector, Protector, ProtectorExt};

/// Derives [`Protectable`] from `#[protect]`, `#[protect(optional)]` and
/// `#[protect(nested)]` field attributes.
pub use data_protection_derive::Protectable;
