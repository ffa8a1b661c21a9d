//! AES-256-GCM-SIV sealing, HKDF purpose subkeys and payload framing.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant.
//! A fresh random nonce is still generated for every seal, so protecting the
//! same plaintext twice yields different payloads.

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::CryptoError;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// First four bytes of every key-ring payload.
pub const MAGIC_HEADER: [u8; 4] = [0x09, 0xF0, 0xC9, 0xF0];

const KEY_ID_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC_HEADER.len() + KEY_ID_LEN;

/// HKDF info label; versioned so the derivation can change without
/// colliding with existing subkeys.
const SUBKEY_LABEL: &[u8] = b"data-protection/v1/purpose";

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct SecretKey(Box<[u8; KEY_LEN]>);

impl SecretKey {
    /// Generate fresh key material from the OS CSPRNG.
    pub fn generate() -> Self {
        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// Copy key material out of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        // Zero the key material on drop.
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SecretKey([REDACTED])")
    }
}

/// A parsed key-ring payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPayload {
    /// Id of the master key the payload was sealed under.
    pub key_id: Uuid,
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl ProtectedPayload {
    /// Encode this payload to its binary representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&header(&self.key_id));
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a binary payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPayload`] if the input is too short to
    /// hold a header, nonce and tag, or does not start with [`MAGIC_HEADER`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidPayload);
        }
        let (magic, rest) = bytes.split_at(MAGIC_HEADER.len());
        if magic != MAGIC_HEADER {
            return Err(CryptoError::InvalidPayload);
        }
        let (key_id, rest) = rest.split_at(KEY_ID_LEN);
        let key_id = Uuid::from_slice(key_id).map_err(|_| CryptoError::InvalidPayload)?;
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            key_id,
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Associated data bound into the AEAD for this payload.
    pub fn associated_data(&self) -> [u8; HEADER_LEN] {
        header(&self.key_id)
    }
}

/// `magic | key_id`, used both as the payload prefix and as AEAD associated data.
pub fn header(key_id: &Uuid) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[..MAGIC_HEADER.len()].copy_from_slice(&MAGIC_HEADER);
    out[MAGIC_HEADER.len()..].copy_from_slice(key_id.as_bytes());
    out
}

/// Derive the subkey for a purpose chain from a master key.
///
/// Each purpose is length-prefixed in the HKDF info so that `["ab", "c"]`
/// and `["a", "bc"]` produce unrelated keys.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
pub fn derive_subkey(master: &SecretKey, purposes: &[String]) -> Result<SecretKey, CryptoError> {
    let mut info = SUBKEY_LABEL.to_vec();
    for purpose in purposes {
        info.extend_from_slice(&(purpose.len() as u32).to_be_bytes());
        info.extend_from_slice(purpose.as_bytes());
    }

    let hk = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = Box::new([0u8; KEY_LEN]);
    hk.expand(&info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SecretKey(okm))
}

/// Encrypt `plaintext` under `key`, binding `aad`.
///
/// A random 96-bit nonce is generated per call via the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailure`] on an internal AEAD error.
pub fn seal(
    key: &SecretKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = build_cipher(key)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailure)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt and authenticate `ciphertext` under `key`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPayload`] if authentication fails (wrong key,
/// wrong associated data, or tampered data).
pub fn open(
    key: &SecretKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = build_cipher(key)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::InvalidPayload)
}

fn build_cipher(key: &SecretKey) -> Result<Aes256GcmSiv, CryptoError> {
    Aes256GcmSiv::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKeyLength)
}
