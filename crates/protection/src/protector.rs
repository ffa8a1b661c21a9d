//! The [`Protector`] capability and its key-ring backed implementation.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};

use crate::crypto::cipher::{self, derive_subkey, ProtectedPayload};
use crate::error::{CryptoError, ProtectionError, PropertyProtectionError};
use crate::keys::{KeyRing, MasterKey, DEFAULT_KEY_LIFETIME_DAYS};
use crate::properties::{self, Protectable};

/// Authenticated encryption scoped to a purpose.
///
/// Implementations hold only immutable state per call and are safe to share
/// across threads.
#[cfg_attr(test, mockall::automock)]
pub trait Protector: Send + Sync {
    /// Protect `plaintext`. Each call uses a fresh nonce, so the output is
    /// not deterministic.
    ///
    /// # Errors
    ///
    /// [`ProtectionError::InvalidArgument`] for empty input,
    /// [`ProtectionError::Crypto`] if no key is available.
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError>;

    /// Reverse [`Protector::protect`].
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidPayload`] if `protected` was not produced by a
    /// protector with the same key material and purpose chain.
    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError>;

    /// A protector for the sub-purpose `purpose`. Payloads from one purpose
    /// never unprotect under another.
    fn derive(&self, purpose: &str) -> Result<Box<dyn Protector>, ProtectionError>;
}

/// Text and object-graph helpers available on every [`Protector`].
pub trait ProtectorExt: Protector {
    /// Protect UTF-8 text, returning base64url (unpadded) text.
    fn protect_str(&self, plaintext: &str) -> Result<String, ProtectionError> {
        if plaintext.is_empty() {
            return Err(ProtectionError::InvalidArgument("plaintext"));
        }
        let protected = self.protect(plaintext.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(protected))
    }

    /// Reverse [`ProtectorExt::protect_str`]. Text that is not base64url is
    /// reported as [`CryptoError::InvalidPayload`].
    fn unprotect_str(&self, protected: &str) -> Result<String, ProtectionError> {
        if protected.is_empty() {
            return Err(ProtectionError::InvalidArgument("protected"));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(protected)
            .map_err(|_| CryptoError::InvalidPayload)?;
        let plaintext = self.unprotect(&bytes)?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// See [`properties::protect_properties`].
    fn protect_properties<T>(&self, object: &mut T) -> Result<&Self, PropertyProtectionError>
    where
        T: Protectable + ?Sized,
    {
        properties::protect_properties(self, object)
    }

    /// See [`properties::unprotect_properties`].
    fn unprotect_properties<T>(&self, object: &mut T) -> Result<&Self, PropertyProtectionError>
    where
        T: Protectable + ?Sized,
    {
        properties::unprotect_properties(self, object)
    }
}

impl<P: Protector + ?Sized> ProtectorExt for P {}

/// Root of protector creation: owns a handle to the key ring.
///
/// Cheap to clone; construct once at startup and pass it where protectors are
/// needed.
#[derive(Clone, Debug)]
pub struct DataProtectionProvider {
    key_ring: KeyRing,
}

impl DataProtectionProvider {
    pub fn new(key_ring: KeyRing) -> Self {
        Self { key_ring }
    }

    /// A provider whose single key lives only in memory. Payloads cannot be
    /// unprotected once the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLifetime`] if the default lifetime
    /// cannot be added to the current time.
    pub fn ephemeral() -> Result<Self, ProtectionError> {
        let key = MasterKey::generate(Utc::now(), Duration::days(DEFAULT_KEY_LIFETIME_DAYS))?;
        Ok(Self::new(KeyRing::from_keys(vec![key])))
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.key_ring
    }

    /// Create a protector for the top-level `purpose`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtectionError::InvalidArgument`] if `purpose` is empty.
    pub fn create_protector(&self, purpose: &str) -> Result<DataProtector, ProtectionError> {
        ensure_purpose(purpose)?;
        Ok(DataProtector {
            key_ring: self.key_ring.clone(),
            purposes: Arc::from(vec![purpose.to_owned()]),
        })
    }
}

/// Key-ring backed [`Protector`] bound to a purpose chain.
#[derive(Clone, Debug)]
pub struct DataProtector {
    key_ring: KeyRing,
    purposes: Arc<[String]>,
}

impl DataProtector {
    /// The purpose chain, outermost first.
    pub fn purposes(&self) -> &[String] {
        &self.purposes
    }

    /// Typed form of [`Protector::derive`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtectionError::InvalidArgument`] if `purpose` is empty.
    pub fn create_protector(&self, purpose: &str) -> Result<DataProtector, ProtectionError> {
        ensure_purpose(purpose)?;
        let mut purposes = self.purposes.to_vec();
        purposes.push(purpose.to_owned());
        Ok(DataProtector {
            key_ring: self.key_ring.clone(),
            purposes: Arc::from(purposes),
        })
    }
}

impl Protector for DataProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if plaintext.is_empty() {
            return Err(ProtectionError::InvalidArgument("plaintext"));
        }
        let key = self
            .key_ring
            .default_key(Utc::now())
            .ok_or(CryptoError::NoActiveKey)?;
        let subkey = derive_subkey(key.secret(), &self.purposes)?;
        let (nonce, ciphertext) = cipher::seal(&subkey, plaintext, &cipher::header(&key.id))?;

        Ok(ProtectedPayload {
            key_id: key.id,
            nonce,
            ciphertext,
        }
        .to_bytes())
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if protected.is_empty() {
            return Err(ProtectionError::InvalidArgument("protected"));
        }
        let payload = ProtectedPayload::from_bytes(protected)?;
        let key = self.key_ring.resolve(&payload.key_id)?;
        let subkey = derive_subkey(key.secret(), &self.purposes)?;
        let plaintext = cipher::open(
            &subkey,
            &payload.nonce,
            &payload.ciphertext,
            &payload.associated_data(),
        )?;
        Ok(plaintext)
    }

    fn derive(&self, purpose: &str) -> Result<Box<dyn Protector>, ProtectionError> {
        Ok(Box::new(self.create_protector(purpose)?))
    }
}

fn ensure_purpose(purpose: &str) -> Result<(), ProtectionError> {
    if purpose.trim().is_empty() {
        return Err(ProtectionError::InvalidArgument("purpose"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector() -> DataProtector {
        DataProtectionProvider::ephemeral()
            .unwrap()
            .create_protector("tests")
            .unwrap()
    }

    fn payload_failure(result: Result<Vec<u8>, ProtectionError>) -> bool {
        matches!(result, Err(ProtectionError::Crypto(e)) if e.is_payload_failure())
    }

    #[test]
    fn protect_unprotect_round_trip() {
        let p = protector();
        let protected = p.protect(b"hunter2").unwrap();
        assert_ne!(protected, b"hunter2");
        assert_eq!(p.unprotect(&protected).unwrap(), b"hunter2");
    }

    #[test]
    fn empty_plaintext_rejected() {
        assert!(matches!(
            protector().protect(b""),
            Err(ProtectionError::InvalidArgument("plaintext"))
        ));
    }

    #[test]
    fn empty_purpose_rejected() {
        let provider = DataProtectionProvider::ephemeral().unwrap();
        assert!(matches!(
            provider.create_protector(""),
            Err(ProtectionError::InvalidArgument("purpose"))
        ));
        assert!(protector().derive("  ").is_err());
    }

    #[test]
    fn purposes_are_isolated() {
        let root = protector();
        let a = root.create_protector("a").unwrap();
        let b = root.create_protector("b").unwrap();
        let protected = a.protect(b"secret").unwrap();
        assert!(payload_failure(b.unprotect(&protected)));
        assert!(payload_failure(root.unprotect(&protected)));
        assert_eq!(a.unprotect(&protected).unwrap(), b"secret");
    }

    #[test]
    fn derive_matches_typed_chain() {
        let root = protector();
        let boxed = root.derive("smtp").unwrap();
        let protected = boxed.protect(b"pw").unwrap();
        let typed = root.create_protector("smtp").unwrap();
        assert_eq!(typed.purposes(), ["tests", "smtp"]);
        assert_eq!(typed.unprotect(&protected).unwrap(), b"pw");
    }

    #[test]
    fn other_key_ring_reports_missing_key() {
        let protected = protector().protect(b"secret").unwrap();
        let err = protector().unprotect(&protected).unwrap_err();
        assert!(matches!(
            err,
            ProtectionError::Crypto(CryptoError::KeyNotFound(_))
        ));
    }

    #[test]
    fn empty_ring_has_no_active_key() {
        let p = DataProtectionProvider::new(KeyRing::new())
            .create_protector("tests")
            .unwrap();
        assert!(matches!(
            p.protect(b"x"),
            Err(ProtectionError::Crypto(CryptoError::NoActiveKey))
        ));
    }

    #[test]
    fn older_keys_still_unprotect_after_rotation() {
        let provider = DataProtectionProvider::ephemeral().unwrap();
        let p = provider.create_protector("tests").unwrap();
        let protected = p.protect(b"before").unwrap();

        let mut keys: Vec<MasterKey> = provider
            .key_ring()
            .keys()
            .iter()
            .map(|k| (**k).clone())
            .collect();
        let newer = MasterKey::generate(Utc::now(), Duration::days(90)).unwrap();
        let newer_id = newer.id;
        keys.push(newer);
        provider.key_ring().replace_all(keys);

        assert_eq!(p.unprotect(&protected).unwrap(), b"before");
        let fresh = ProtectedPayload::from_bytes(&p.protect(b"after").unwrap()).unwrap();
        assert_eq!(fresh.key_id, newer_id);
    }

    #[test]
    fn revoked_key_refuses_unprotect() {
        let provider = DataProtectionProvider::ephemeral().unwrap();
        let p = provider.create_protector("tests").unwrap();
        let protected = p.protect(b"secret").unwrap();

        let mut key = (*provider.key_ring().keys()[0]).clone();
        key.revoked = true;
        provider.key_ring().replace_all(vec![key]);

        assert!(matches!(
            p.unprotect(&protected),
            Err(ProtectionError::Crypto(CryptoError::KeyRevoked(_)))
        ));
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let p = protector();
        let mut protected = p.protect(b"secret").unwrap();
        // Last byte of the key id; the key lookup fails before decryption.
        protected[19] ^= 0x01;
        assert!(p.unprotect(&protected).is_err());
    }

    #[test]
    fn str_helpers_round_trip() {
        let p = protector();
        let protected = p.protect_str("secret2").unwrap();
        assert_ne!(protected, "secret2");
        assert!(!protected.contains('='));
        assert_eq!(p.unprotect_str(&protected).unwrap(), "secret2");
    }

    #[test]
    fn plain_text_is_a_payload_failure() {
        let p = protector();
        for plain in ["plain text secret", "secret3", "abcd"] {
            match p.unprotect_str(plain) {
                Err(ProtectionError::Crypto(e)) => assert!(e.is_payload_failure(), "{plain}"),
                other => panic!("expected payload failure for {plain:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_utf8_plaintext_is_an_encoding_error() {
        let p = protector();
        let protected = URL_SAFE_NO_PAD.encode(p.protect(&[0xFF, 0xFE]).unwrap());
        assert!(matches!(
            p.unprotect_str(&protected),
            Err(ProtectionError::Encoding(_))
        ));
    }
}
