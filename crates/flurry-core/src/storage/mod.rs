//! Storage account abstraction.
//!
//! A storage account is an object store whose first path segment names a
//! container. The blob, activity log and queue collaborators the listeners
//! consume are all implemented on top of one [`StorageProvider`].

mod activity_log;
mod blob_path;
mod blob_store;
mod local;
mod queue_store;
mod traits;
mod types;
mod url_parser;

pub use activity_log::{LOG_ROOT, StoreActivityLog, log_file_key};
pub use blob_path::BlobPath;
pub use local::LocalConfig;
pub use queue_store::{QUEUE_ROOT, StoreQueue};
pub use traits::{ActivityLog, BlobStore, QueueStore};
pub use types::{BlobAttributes, BlobItem, LogBatch, LogCursor, QueueMessage};
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider over a single object store.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

fn status_of<T>(result: &Result<T, object_store::Error>) -> RequestStatus {
    match result {
        Ok(_) => RequestStatus::Success,
        Err(object_store::Error::NotFound { .. }) => RequestStatus::NotFound,
        Err(_) => RequestStatus::Error,
    }
}

fn record<T>(operation: StorageOperation, start: Instant, result: &Result<T, object_store::Error>) {
    emit!(StorageRequest {
        operation,
        status: status_of(result),
    });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Memory => Ok(Self::in_memory()),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Create an empty in-memory storage account.
    pub fn in_memory() -> Self {
        Self {
            config: BackendConfig::Memory,
            object_store: Arc::new(InMemory::new()),
            canonical_url: "memory://".to_string(),
        }
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// URL this provider was opened with, without a trailing slash.
    pub fn canonical_url(&self) -> &str {
        self.canonical_url.trim_end_matches('/')
    }

    /// Absolute URI of an object key.
    pub fn uri_for(&self, key: &Path) -> String {
        format!("{}/{}", self.canonical_url(), key)
    }

    /// List every object under `prefix`, recursively.
    pub async fn list(&self, prefix: &Path) -> Result<Vec<ObjectMeta>, StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .list(Some(prefix))
            .try_collect::<Vec<_>>()
            .await;
        record(StorageOperation::List, start, &result);
        result.context(ObjectStoreSnafu)
    }

    /// Fetch object metadata without reading its content.
    pub async fn head(&self, path: &Path) -> Result<ObjectMeta, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(path).await;
        record(StorageOperation::Head, start, &result);
        result.context(ObjectStoreSnafu)
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(path).await {
            Ok(data) => data.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, &result);
        result.context(ObjectStoreSnafu)
    }

    /// Write an object, replacing any existing content.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(path, PutPayload::from(bytes)).await;
        record(StorageOperation::Put, start, &result);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(path).await;
        record(StorageOperation::Delete, start, &result);
        result.context(ObjectStoreSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete_in_memory() {
        let storage = StorageProvider::in_memory();
        let path = Path::from("input/a.csv");

        storage.put(&path, Bytes::from_static(b"1,2,3")).await.unwrap();
        assert_eq!(storage.get(&path).await.unwrap(), Bytes::from_static(b"1,2,3"));

        storage.delete(&path).await.unwrap();
        let err = storage.get(&path).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_provider_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("account");
        let url = format!("file://{}", root.display());

        let storage = StorageProvider::for_url(&url).await.unwrap();
        assert!(root.is_dir());

        storage
            .put(&Path::from("input/nested/b.txt"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        let listed = storage.list(&Path::from("input")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].location.as_ref(), "input/nested/b.txt");
        assert!(storage.uri_for(&listed[0].location).ends_with("/account/input/nested/b.txt"));
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let storage = StorageProvider::in_memory();
        let err = storage.head(&Path::from("input/missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
