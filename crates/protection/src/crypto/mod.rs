//! AES-256-GCM-SIV primitives, purpose key derivation and the protected
//! payload format.
//!
//! This module is free of key-ring and storage concerns. It provides the
//! low-level seal/open operations used by the protectors.
//!
//! # Payload format
//!
//! ```text
//! magic(4) | key_id(16) | nonce(12) | ciphertext+tag
//! ```
//!
//! `magic | key_id` is bound into the AEAD as associated data, so a payload
//! moved onto another key id fails authentication.

pub mod cipher;
pub mod password;

pub use cipher::{ProtectedPayload, SecretKey, KEY_LEN};
pub use password::PasswordProtector;
