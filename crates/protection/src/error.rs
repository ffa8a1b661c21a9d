//! Error types shared across the protection layers.

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::KEY_LEN;
use crate::properties::Operation;

/// Errors produced by the cipher and the key ring.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The payload is not a protected value: it is truncated, carries the
    /// wrong header, is not valid base64url, or failed AEAD authentication
    /// (tampered data, wrong purpose, wrong key material).
    #[error("the payload is not valid protected data or failed authentication")]
    InvalidPayload,

    /// The payload names a key the key ring does not hold.
    #[error("key {0} was not found in the key ring")]
    KeyNotFound(Uuid),

    /// The payload names a key that has been revoked.
    #[error("key {0} has been revoked")]
    KeyRevoked(Uuid),

    /// No key is currently active, so nothing can be protected.
    #[error("the key ring has no active key")]
    NoActiveKey,

    /// Key material is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {} bytes", KEY_LEN)]
    InvalidKeyLength,

    /// A key lifetime is not positive or pushes the expiration date past
    /// the supported range.
    #[error("key lifetime is out of range")]
    InvalidKeyLifetime,

    /// Deriving a purpose or password key failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AES-GCM-SIV encryption failed.
    #[error("aead encryption failed")]
    EncryptionFailure,
}

impl CryptoError {
    /// Returns `true` for the authentication/format failure class: the input
    /// could not be validated as protected data.
    ///
    /// Key-ring conditions (missing, revoked or absent keys) and derivation
    /// errors are not part of this class.
    pub fn is_payload_failure(&self) -> bool {
        matches!(self, CryptoError::InvalidPayload)
    }
}

/// Errors produced while reading or writing persisted keys.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("key record serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blob store rejected or failed a request.
    #[error("blob key storage request failed: {0}")]
    Blob(String),

    /// A persisted record could not be turned into a usable key.
    #[error("invalid key record {id}: {reason}")]
    InvalidRecord { id: Uuid, reason: String },
}

/// Top-level error type for protectors, providers and key management.
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// A required argument was empty.
    #[error("invalid argument: `{0}` must not be empty")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Unprotected bytes did not decode as UTF-8 text.
    #[error("unprotected value is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A nested object failed while being walked.
    #[error(transparent)]
    Property(#[from] Box<PropertyProtectionError>),
}

/// Failure while protecting or unprotecting one field of an object graph.
///
/// This is the only error returned by
/// [`protect_properties`](crate::protect_properties) and
/// [`unprotect_properties`](crate::unprotect_properties). When it is
/// returned the object may already be partially mutated and should be
/// rebuilt from its source rather than reused.
#[derive(Debug, Error)]
#[error("failed to {operation} property `{field}` of type `{containing_type}`")]
pub struct PropertyProtectionError {
    pub operation: Operation,
    pub field: &'static str,
    pub containing_type: &'static str,
    #[source]
    pub cause: ProtectionError,
}

impl PropertyProtectionError {
    pub(crate) fn new(
        operation: Operation,
        field: &'static str,
        containing_type: &'static str,
        cause: ProtectionError,
    ) -> Self {
        Self {
            operation,
            field,
            containing_type,
            cause,
        }
    }

    /// The innermost non-property failure.
    pub fn root_cause(&self) -> &ProtectionError {
        let mut cause = &self.cause;
        while let ProtectionError::Property(inner) = cause {
            cause = &inner.cause;
        }
        cause
    }

    /// The crypto failure at the root of this error, if that is what it is.
    pub fn crypto_error(&self) -> Option<&CryptoError> {
        match self.root_cause() {
            ProtectionError::Crypto(e) => Some(e),
            _ => None,
        }
    }

    /// Dot-separated field path from the outermost object to the failing
    /// field, e.g. `"database.credentials.password"`.
    pub fn path(&self) -> String {
        let mut path = self.field.to_owned();
        let mut cause = &self.cause;
        while let ProtectionError::Property(inner) = cause {
            path.push('.');
            path.push_str(inner.field);
            cause = &inner.cause;
        }
        path
    }
}
