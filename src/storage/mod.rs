//! Object storage for uploaded CSV payloads
//! Uses Apache Arrow object_store crate

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use object_store::{ObjectStore, local::LocalFileSystem, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::jobs::{ImportJob, PayloadRef};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("Failed to prepare storage root: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty payload")]
    Empty,

    #[error("Malformed payload encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Payload is not valid UTF-8")]
    NotUtf8,
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Local filesystem storage rooted at `root` (created if missing)
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let fs = LocalFileSystem::new_with_prefix(root.as_ref())?;
        Ok(Self::new(Arc::new(fs)))
    }

    /// Upload bytes to storage
    pub async fn upload(&self, key: &str, data: impl Into<Bytes>) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let data: Bytes = data.into();
        let size = data.len();

        let put_result = self.store.put(&path, data.into()).await?;

        tracing::info!(key, size, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);

        let result = self.store.get(&path).await?;
        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes)
    }

    /// Delete an object; a missing key is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = StoragePath::from(key);

        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(key, "Deleted from storage");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Storage key of an uploaded payload
pub fn upload_key(user_id: &str, upload_id: &str) -> String {
    format!("uploads/{user_id}/{upload_id}.csv.b64")
}

/// Wire encoding of CSV payloads
pub fn encode_payload(content: &[u8]) -> String {
    BASE64.encode(content)
}

/// Decode wire-encoded payload into CSV text
///
/// Empty input, malformed base64 and non-UTF-8 content are all errors.
pub fn decode_payload(encoded: &[u8]) -> Result<String> {
    let trimmed = encoded.trim_ascii();
    if trimmed.is_empty() {
        return Err(StorageError::Empty);
    }

    let bytes = BASE64.decode(trimmed)?;
    if bytes.is_empty() {
        return Err(StorageError::Empty);
    }

    String::from_utf8(bytes).map_err(|_| StorageError::NotUtf8)
}

/// Where a job's raw encoded bytes come from
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Encoded payload bytes for the job
    async fn fetch(&self, job: &ImportJob) -> Result<Bytes>;

    /// Release transient payload storage after success
    async fn discard(&self, job: &ImportJob) -> Result<()>;
}

/// Resolves inline payloads directly and stored ones through [`StorageClient`]
#[derive(Clone)]
pub struct PayloadSource {
    storage: StorageClient,
}

impl PayloadSource {
    pub fn new(storage: StorageClient) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ContentSource for PayloadSource {
    async fn fetch(&self, job: &ImportJob) -> Result<Bytes> {
        match &job.payload {
            PayloadRef::Inline { content } => Ok(Bytes::from(content.clone())),
            PayloadRef::Stored { key } => self.storage.download(key).await,
        }
    }

    async fn discard(&self, job: &ImportJob) -> Result<()> {
        match job.payload.storage_key() {
            Some(key) => self.storage.delete(key).await,
            None => Ok(()),
        }
    }
}
