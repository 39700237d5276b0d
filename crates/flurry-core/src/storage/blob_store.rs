use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use snafu::prelude::*;
use std::time::Instant;
use tracing::debug;

use super::{BackendConfig, BlobAttributes, BlobItem, BlobPath, BlobStore, StorageProvider};
use crate::emit;
use crate::error::{IoSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// Names reserved for the account's own bookkeeping.
fn is_system_container(container: &str) -> bool {
    container.starts_with('$')
}

impl StorageProvider {
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError> {
        match &self.config {
            // Containers are implicit in memory: they exist once written to.
            BackendConfig::Memory => Ok(true),
            BackendConfig::Local(local) => {
                tokio::fs::try_exists(local.container_dir(container))
                    .await
                    .context(IoSnafu)
            }
        }
    }
}

#[async_trait]
impl BlobStore for StorageProvider {
    async fn list_blobs(&self, container: &str) -> Result<Option<Vec<BlobItem>>, StorageError> {
        if !self.container_exists(container).await? {
            return Ok(None);
        }

        let listed = match self.list(&Path::from(container)).await {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let items = listed
            .into_iter()
            .filter_map(|meta| {
                let path = BlobPath::from_object_key(&meta.location)?;
                (path.container() == container && !is_system_container(path.container())).then(
                    || BlobItem {
                        uri: self.uri_for(&meta.location),
                        path,
                    },
                )
            })
            .collect();
        Ok(Some(items))
    }

    async fn fetch_attributes(
        &self,
        blob: &BlobPath,
    ) -> Result<Option<BlobAttributes>, StorageError> {
        match self.head(&blob.object_key()).await {
            Ok(meta) => Ok(Some(BlobAttributes {
                last_modified: meta.last_modified,
                size: meta.size,
            })),
            Err(e) if e.is_not_found() => {
                debug!(blob = %blob, "Blob vanished before attributes were fetched");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_container_if_missing(&self, container: &str) -> Result<(), StorageError> {
        let BackendConfig::Local(local) = &self.config else {
            return Ok(());
        };

        let start = Instant::now();
        let result = tokio::fs::create_dir_all(local.container_dir(container)).await;
        emit!(StorageRequest {
            operation: StorageOperation::CreateContainer,
            status: if result.is_ok() {
                RequestStatus::Success
            } else {
                RequestStatus::Error
            },
        });
        emit!(StorageRequestDuration {
            operation: StorageOperation::CreateContainer,
            duration: start.elapsed(),
        });
        result.context(IoSnafu)
    }

    async fn read_blob(&self, blob: &BlobPath) -> Result<Bytes, StorageError> {
        self.get(&blob.object_key()).await
    }

    async fn write_blob(&self, blob: &BlobPath, content: Bytes) -> Result<(), StorageError> {
        self.put(&blob.object_key(), content).await
    }
}
