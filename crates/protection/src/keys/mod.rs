//! Master key lifecycle: load, generate, persist, revoke and refresh.
//!
//! # Lifecycle
//!
//! 1. At startup, [`KeyManager::from_options`] picks the key storage
//!    (local directory or blob) and calls [`KeyManager::load`].
//! 2. `load` reads every persisted record into the shared [`KeyRing`]. If no
//!    key is active, or the active key expires within two days without a
//!    successor, a new key is generated and persisted first (unless
//!    automatic generation is disabled).
//! 3. A background Tokio task, [`refresh_task`], repeats `load` on a
//!    configurable interval so rotation performed by other processes sharing
//!    the storage is picked up.
//! 4. Protectors read the ring lock-free; they never touch storage.
//!
//! # Security invariants
//!
//! - Key material is never logged or included in traces; only key ids and
//!   dates are.

pub mod blob;
pub mod ring;
pub mod storage;

pub use blob::BlobKeyRepository;
pub use ring::{KeyRecord, KeyRing, MasterKey};
pub use storage::{FileSystemKeyRepository, KeyStorage};

use chrono::{DateTime, Duration, Utc};
use tokio::time;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DataProtectionOptions;
use crate::error::{CryptoError, ProtectionError};
use crate::protector::DataProtectionProvider;

/// Lifetime given to generated keys when none is configured.
pub const DEFAULT_KEY_LIFETIME_DAYS: i64 = 90;

/// A successor is generated once the active key is this close to expiring.
const RENEWAL_WINDOW_DAYS: i64 = 2;

/// Owns the key storage and keeps the shared [`KeyRing`] in sync with it.
#[derive(Clone, Debug)]
pub struct KeyManager {
    storage: KeyStorage,
    ring: KeyRing,
    automatic_key_generation: bool,
    key_lifetime: Duration,
}

impl KeyManager {
    pub fn new(storage: KeyStorage, automatic_key_generation: bool, key_lifetime: Duration) -> Self {
        Self {
            storage,
            ring: KeyRing::new(),
            automatic_key_generation,
            key_lifetime,
        }
    }

    /// Build the storage described by `options` and load the key ring.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage location cannot be resolved or
    /// reached, a persisted record is invalid, or a generated key cannot be
    /// persisted.
    pub async fn from_options(options: &DataProtectionOptions) -> Result<Self, ProtectionError> {
        let storage = match &options.blob_key_storage {
            Some(blob) => {
                info!(
                    container = %blob.container_name,
                    blob = %blob.blob_name,
                    "using blob key storage"
                );
                KeyStorage::Blob(BlobKeyRepository::connect(blob).await)
            }
            None => {
                let directory = options.key_directory()?;
                info!(directory = %directory.display(), "using local key storage");
                KeyStorage::FileSystem(FileSystemKeyRepository::new(directory))
            }
        };

        if options.disable_automatic_key_generation {
            warn!("automatic key generation is disabled");
        }

        let manager = Self::new(
            storage,
            !options.disable_automatic_key_generation,
            Duration::days(i64::from(options.key_lifetime_days)),
        );
        manager.load().await?;
        Ok(manager)
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.ring
    }

    pub fn storage(&self) -> &KeyStorage {
        &self.storage
    }

    /// A provider sharing this manager's key ring; it sees every later reload.
    pub fn provider(&self) -> DataProtectionProvider {
        DataProtectionProvider::new(self.ring.clone())
    }

    /// Read all persisted keys, generate a key if one is due, and swap the
    /// result into the ring.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or written, or a persisted
    /// record is invalid. The ring keeps its previous contents on error.
    pub async fn load(&self) -> Result<(), ProtectionError> {
        let records = self.storage.load_all().await?;
        let mut keys = records
            .iter()
            .map(MasterKey::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        if let Some(activation) = next_activation(&keys, now) {
            if self.automatic_key_generation {
                let key = MasterKey::generate(activation, self.key_lifetime)?;
                self.storage.store(&key.to_record()).await?;
                info!(
                    key_id = %key.id,
                    activation = %key.activation_date,
                    expiration = %key.expiration_date,
                    "generated new master key"
                );
                keys.push(key);
            } else {
                warn!(
                    keys = keys.len(),
                    "no usable key for upcoming protections and automatic key generation is disabled"
                );
            }
        }

        self.ring.replace_all(keys);
        info!(keys = self.ring.len(), "key ring loaded");
        Ok(())
    }

    /// Mark key `id` revoked in storage and reload. Payloads protected under
    /// a revoked key can no longer be unprotected.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotFound`] if storage has no such key, or a
    /// storage error.
    pub async fn revoke(&self, id: Uuid) -> Result<(), ProtectionError> {
        let mut record = self
            .storage
            .load_all()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(CryptoError::KeyNotFound(id))?;
        record.revoked = true;
        self.storage.store(&record).await?;
        warn!(key_id = %id, "master key revoked");
        self.load().await
    }
}

/// When a new key should activate, if one is needed at all.
///
/// `now` when nothing is active; the current key's expiration when that is
/// inside the renewal window and nothing takes over from it.
fn next_activation(keys: &[MasterKey], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let current = keys
        .iter()
        .filter(|k| k.is_active_at(now))
        .max_by_key(|k| k.activation_date);

    match current {
        None => Some(now),
        Some(cur) if cur.expiration_date - now <= Duration::days(RENEWAL_WINDOW_DAYS) => {
            let has_successor = keys.iter().any(|k| k.is_active_at(cur.expiration_date));
            (!has_successor).then_some(cur.expiration_date)
        }
        Some(_) => None,
    }
}

/// Shortest interval [`refresh_task`] will reload at.
pub const MIN_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Spawn a background task that periodically reloads the key ring.
///
/// The first reload fires after one full interval (startup load is assumed
/// to have already populated the ring). On failure the previous ring is
/// retained and a warning is emitted. Intervals below
/// [`MIN_REFRESH_INTERVAL`] are raised to it.
pub fn refresh_task(manager: KeyManager, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(MIN_REFRESH_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; the startup load already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match manager.load().await {
                Ok(()) => info!("key ring refreshed"),
                Err(e) => warn!(error = %e, "key ring refresh failed; retaining previous keys"),
            }
        }
    })
}
