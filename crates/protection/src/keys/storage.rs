//! Persistence of [`KeyRecord`]s.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::blob::BlobKeyRepository;
use super::ring::KeyRecord;
use crate::error::StorageError;

const KEY_FILE_PREFIX: &str = "key-";
const KEY_FILE_EXTENSION: &str = "json";

/// Where master keys are persisted.
#[derive(Clone, Debug)]
pub enum KeyStorage {
    /// One JSON file per key in a local directory.
    FileSystem(FileSystemKeyRepository),
    /// One JSON document holding every key, in an object store.
    Blob(BlobKeyRepository),
}

impl KeyStorage {
    /// Read every persisted record.
    pub async fn load_all(&self) -> Result<Vec<KeyRecord>, StorageError> {
        match self {
            KeyStorage::FileSystem(repo) => repo.load_all().await,
            KeyStorage::Blob(repo) => repo.load_all().await,
        }
    }

    /// Insert or replace the record with `record.id`.
    pub async fn store(&self, record: &KeyRecord) -> Result<(), StorageError> {
        match self {
            KeyStorage::FileSystem(repo) => repo.store(record).await,
            KeyStorage::Blob(repo) => repo.store(record).await,
        }
    }
}

/// Local directory key repository.
#[derive(Clone, Debug)]
pub struct FileSystemKeyRepository {
    directory: PathBuf,
}

impl FileSystemKeyRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn key_path(&self, record: &KeyRecord) -> PathBuf {
        self.directory
            .join(format!("{KEY_FILE_PREFIX}{}.{KEY_FILE_EXTENSION}", record.id))
    }

    /// Read every `key-*.json` file in the directory. A missing directory is
    /// an empty ring.
    pub async fn load_all(&self) -> Result<Vec<KeyRecord>, StorageError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(directory = %self.directory.display(), "key directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_key_file(&path) {
                continue;
            }
            let text = fs::read_to_string(&path).await?;
            let record: KeyRecord = serde_json::from_str(&text)?;
            records.push(record);
        }

        debug!(
            directory = %self.directory.display(),
            count = records.len(),
            "loaded key records"
        );
        Ok(records)
    }

    /// Write `record` to its own file, creating the directory on demand.
    ///
    /// The file is written beside its final name and renamed into place so
    /// readers never observe a partial record.
    pub async fn store(&self, record: &KeyRecord) -> Result<(), StorageError> {
        fs::create_dir_all(&self.directory).await?;

        let path = self.key_path(record);
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            warn!(path = %path.display(), error = %e, "failed to move key file into place");
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn is_key_file(path: &Path) -> bool {
    let named_like_key = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(KEY_FILE_PREFIX));
    named_like_key && path.extension().is_some_and(|ext| ext == KEY_FILE_EXTENSION)
}
