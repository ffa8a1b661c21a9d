//! [`KeyRing`]: lock-free snapshot of the master keys a provider can use.

use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::SecretKey;
use crate::error::{CryptoError, StorageError};

/// Persisted form of a master key.
///
/// Key material is stored base64-encoded and unencrypted; protect the
/// storage location accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub activation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
    pub material: String,
}

/// A master key held in memory.
#[derive(Debug, Clone)]
pub struct MasterKey {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub activation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub revoked: bool,
    secret: SecretKey,
}

impl MasterKey {
    /// Generate a new key that becomes active at `activation` and expires
    /// `lifetime` later.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLifetime`] if `lifetime` is not
    /// positive or the expiration falls outside the representable date range.
    pub fn generate(activation: DateTime<Utc>, lifetime: Duration) -> Result<Self, CryptoError> {
        if lifetime <= Duration::zero() {
            return Err(CryptoError::InvalidKeyLifetime);
        }
        let expiration_date = activation
            .checked_add_signed(lifetime)
            .ok_or(CryptoError::InvalidKeyLifetime)?;

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            activation_date: activation,
            expiration_date,
            revoked: false,
            secret: SecretKey::generate(),
        })
    }

    /// `true` if the key may be used to protect new data at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.activation_date <= now && now < self.expiration_date
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn to_record(&self) -> KeyRecord {
        KeyRecord {
            id: self.id,
            created_at: self.created_at,
            activation_date: self.activation_date,
            expiration_date: self.expiration_date,
            revoked: self.revoked,
            material: STANDARD.encode(self.secret.as_bytes()),
        }
    }

    /// Rebuild a key from its persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRecord`] if the material is not base64
    /// of the right length, or the expiration does not follow activation.
    pub fn from_record(record: &KeyRecord) -> Result<Self, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidRecord {
            id: record.id,
            reason: reason.to_owned(),
        };

        let material = STANDARD
            .decode(&record.material)
            .map_err(|_| invalid("key material is not valid base64"))?;
        let secret = SecretKey::from_slice(&material)
            .map_err(|_| invalid("key material has the wrong length"))?;

        if record.expiration_date <= record.activation_date {
            return Err(invalid("expiration date must follow activation date"));
        }

        Ok(Self {
            id: record.id,
            created_at: record.created_at,
            activation_date: record.activation_date,
            expiration_date: record.expiration_date,
            revoked: record.revoked,
            secret,
        })
    }
}

/// Shared, lock-free set of master keys.
///
/// Internally backed by [`ArcSwap`] so protect/unprotect never block and the
/// key manager can atomically swap in a freshly loaded set.
#[derive(Clone, Debug)]
pub struct KeyRing {
    inner: Arc<ArcSwap<Vec<Arc<MasterKey>>>>,
}

impl KeyRing {
    /// Create a new, empty [`KeyRing`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(Vec::new()))),
        }
    }

    /// Create a ring holding `keys`.
    pub fn from_keys(keys: Vec<MasterKey>) -> Self {
        let ring = Self::new();
        ring.replace_all(keys);
        ring
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Current snapshot, newest activation first.
    pub fn keys(&self) -> Vec<Arc<MasterKey>> {
        (**self.inner.load()).clone()
    }

    /// Atomically replace the entire key set.
    pub fn replace_all(&self, keys: Vec<MasterKey>) {
        let mut keys: Vec<Arc<MasterKey>> = keys.into_iter().map(Arc::new).collect();
        keys.sort_by(|a, b| b.activation_date.cmp(&a.activation_date));
        self.inner.store(Arc::new(keys));
    }

    /// The key new data is protected under: the most recently activated key
    /// that is active at `now`.
    pub fn default_key(&self, now: DateTime<Utc>) -> Option<Arc<MasterKey>> {
        self.inner
            .load()
            .iter()
            .find(|k| k.is_active_at(now))
            .cloned()
    }

    /// The key with `id`, revoked or not.
    pub fn get(&self, id: &Uuid) -> Option<Arc<MasterKey>> {
        self.inner.load().iter().find(|k| k.id == *id).cloned()
    }

    /// Look up the key a payload names.
    ///
    /// Expired keys still resolve so that old data stays readable.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotFound`] or [`CryptoError::KeyRevoked`].
    pub fn resolve(&self, id: &Uuid) -> Result<Arc<MasterKey>, CryptoError> {
        let key = self.get(id).ok_or(CryptoError::KeyNotFound(*id))?;
        if key.revoked {
            return Err(CryptoError::KeyRevoked(*id));
        }
        Ok(key)
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}
