//! Protector keyed from a password and salt instead of a key ring.
//!
//! The key is derived once with Argon2id (v0x13). Payloads are
//! `nonce (12) | ciphertext + tag`; there is no key id, so a payload only
//! unprotects under the same password, salt and purpose chain.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};

use super::cipher::{self, derive_subkey, SecretKey, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, ProtectionError};
use crate::protector::Protector;

/// Argon2id memory cost in KiB (19 MiB).
const MEMORY_COST_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;

/// Password-derived [`Protector`].
#[derive(Clone, Debug)]
pub struct PasswordProtector {
    key: SecretKey,
    purposes: Arc<[String]>,
}

impl PasswordProtector {
    /// Derive the protector key from `password` and `salt`.
    ///
    /// # Errors
    ///
    /// [`ProtectionError::InvalidArgument`] if either input is empty,
    /// [`CryptoError::KeyDerivation`] if Argon2 rejects them (salts must be
    /// at least 8 bytes).
    pub fn new(password: &str, salt: &[u8]) -> Result<Self, ProtectionError> {
        if password.is_empty() {
            return Err(ProtectionError::InvalidArgument("password"));
        }
        if salt.is_empty() {
            return Err(ProtectionError::InvalidArgument("salt"));
        }

        let params = Params::new(MEMORY_COST_KIB, ITERATIONS, PARALLELISM, Some(KEY_LEN))
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2id parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; KEY_LEN];
        let derived = argon2
            .hash_password_into(password.as_bytes(), salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivation(format!("Argon2id key derivation failed: {e}")))
            .and_then(|()| SecretKey::from_slice(&output));
        output.iter_mut().for_each(|b| *b = 0);

        Ok(Self {
            key: derived?,
            purposes: Arc::from(Vec::new()),
        })
    }

    /// The purpose chain, outermost first. Empty for the root protector.
    pub fn purposes(&self) -> &[String] {
        &self.purposes
    }

    /// Typed form of [`Protector::derive`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtectionError::InvalidArgument`] if `purpose` is empty.
    pub fn create_protector(&self, purpose: &str) -> Result<PasswordProtector, ProtectionError> {
        if purpose.trim().is_empty() {
            return Err(ProtectionError::InvalidArgument("purpose"));
        }
        let mut purposes = self.purposes.to_vec();
        purposes.push(purpose.to_owned());
        Ok(Self {
            key: self.key.clone(),
            purposes: Arc::from(purposes),
        })
    }

    fn subkey(&self) -> Result<SecretKey, CryptoError> {
        derive_subkey(&self.key, &self.purposes)
    }
}

impl Protector for PasswordProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if plaintext.is_empty() {
            return Err(ProtectionError::InvalidArgument("plaintext"));
        }
        let (nonce, ciphertext) = cipher::seal(&self.subkey()?, plaintext, &[])?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if protected.is_empty() {
            return Err(ProtectionError::InvalidArgument("protected"));
        }
        if protected.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidPayload.into());
        }
        let (nonce_bytes, ciphertext) = protected.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        Ok(cipher::open(&self.subkey()?, &nonce, ciphertext, &[])?)
    }

    fn derive(&self, purpose: &str) -> Result<Box<dyn Protector>, ProtectionError> {
        Ok(Box::new(self.create_protector(purpose)?))
    }
}
