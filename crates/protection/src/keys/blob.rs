//! Key repository backed by a single object in an S3-compatible blob store.
//!
//! All records live in one JSON document so that every process sharing the
//! container sees the same ring. Writes are read-modify-write; concurrent
//! writers race and the last one wins.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ring::KeyRecord;
use crate::config::BlobKeyStorageOptions;
use crate::error::StorageError;

/// The persisted blob.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRingDocument {
    #[serde(default)]
    pub keys: Vec<KeyRecord>,
}

impl KeyRingDocument {
    /// Insert `record`, replacing any record with the same id.
    pub fn upsert(&mut self, record: KeyRecord) {
        match self.keys.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.keys.push(record),
        }
    }
}

/// Blob key repository.
#[derive(Clone, Debug)]
pub struct BlobKeyRepository {
    client: aws_sdk_s3::Client,
    container: String,
    blob: String,
}

impl BlobKeyRepository {
    pub fn new(client: aws_sdk_s3::Client, container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            client,
            container: container.into(),
            blob: blob.into(),
        }
    }

    /// Build a client for the endpoint in `options.connection_string`.
    ///
    /// Credentials and region are resolved via the standard AWS credential
    /// chain. Path-style addressing is forced so that the container name is
    /// not required to be a DNS label.
    pub async fn connect(options: &BlobKeyStorageOptions) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(&options.connection_string)
                .force_path_style(true)
                .build(),
        );

        Self::new(client, &options.container_name, &options.blob_name)
    }

    /// Fetch the document. A missing blob is an empty ring.
    pub async fn load_document(&self) -> Result<KeyRingDocument, StorageError> {
        let get = self
            .client
            .get_object()
            .bucket(&self.container)
            .key(&self.blob)
            .send()
            .await;

        let output = match get {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                debug!(container = %self.container, blob = %self.blob, "key blob does not exist yet");
                return Ok(KeyRingDocument::default());
            }
            Err(e) => return Err(StorageError::Blob(DisplayErrorContext(&e).to_string())),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Blob(format!("failed to read key blob body: {e}")))?
            .into_bytes();

        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn load_all(&self) -> Result<Vec<KeyRecord>, StorageError> {
        Ok(self.load_document().await?.keys)
    }

    /// Insert or replace `record` and write the whole document back.
    pub async fn store(&self, record: &KeyRecord) -> Result<(), StorageError> {
        let mut document = self.load_document().await?;
        document.upsert(record.clone());
        let json = serde_json::to_vec_pretty(&document)?;

        self.client
            .put_object()
            .bucket(&self.container)
            .key(&self.blob)
            .content_type("application/json")
            .body(ByteStream::from(json))
            .send()
            .await
            .map_err(|e| StorageError::Blob(DisplayErrorContext(&e).to_string()))?;

        debug!(
            container = %self.container,
            blob = %self.blob,
            keys = document.keys.len(),
            "wrote key blob"
        );
        Ok(())
    }
}
