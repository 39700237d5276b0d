//! In-process fakes shared by unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use flurry_core::{
    ActivityLog, BlobAttributes, BlobItem, BlobPath, BlobStore, LogBatch, LogCursor, StorageError,
};

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

pub fn blob(path: &str) -> BlobPath {
    BlobPath::parse(path).unwrap()
}

#[derive(Default)]
struct FakeState {
    blobs: BTreeMap<BlobPath, (DateTime<Utc>, Bytes)>,
    containers: HashSet<String>,
    /// Blobs that show up in listings but are gone by the time attributes are fetched.
    vanishing: HashSet<BlobPath>,
    created: Vec<String>,
}

/// Blob store with controllable timestamps and races.
#[derive(Default)]
pub struct FakeBlobStore {
    state: Mutex<FakeState>,
    fetches: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, container: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(container.to_string());
        self
    }

    pub fn put(&self, path: &str, modified: DateTime<Utc>) {
        let path = blob(path);
        let mut state = self.state.lock().unwrap();
        state.containers.insert(path.container().to_string());
        state.blobs.insert(path, (modified, Bytes::new()));
    }

    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().blobs.remove(&blob(path));
    }

    /// List `path` but report it missing on attribute fetch.
    pub fn put_vanishing(&self, path: &str, modified: DateTime<Utc>) {
        self.put(path, modified);
        self.state.lock().unwrap().vanishing.insert(blob(path));
    }

    pub fn cancel_after_fetches(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    pub fn created_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn content(&self, path: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(&blob(path))
            .map(|(_, content)| content.clone())
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn list_blobs(&self, container: &str) -> Result<Option<Vec<BlobItem>>, StorageError> {
        let state = self.state.lock().unwrap();
        if !state.containers.contains(container) {
            return Ok(None);
        }
        Ok(Some(
            state
                .blobs
                .keys()
                .filter(|path| path.container() == container)
                .map(|path| BlobItem {
                    path: path.clone(),
                    uri: format!("memory:///{path}"),
                })
                .collect(),
        ))
    }

    async fn fetch_attributes(
        &self,
        blob: &BlobPath,
    ) -> Result<Option<BlobAttributes>, StorageError> {
        let fetched = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if fetched >= *count {
                token.cancel();
            }
        }

        let state = self.state.lock().unwrap();
        if state.vanishing.contains(blob) {
            return Ok(None);
        }
        Ok(state.blobs.get(blob).map(|(modified, content)| BlobAttributes {
            last_modified: *modified,
            size: content.len() as u64,
        }))
    }

    async fn create_container_if_missing(&self, container: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.containers.insert(container.to_string()) {
            state.created.push(container.to_string());
        }
        Ok(())
    }

    async fn read_blob(&self, blob: &BlobPath) -> Result<Bytes, StorageError> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(blob)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StorageError::InvalidPath {
                path: blob.to_string(),
                message: "not found".to_string(),
            })
    }

    async fn write_blob(&self, blob: &BlobPath, content: Bytes) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(blob.container().to_string());
        let modified = state
            .blobs
            .values()
            .map(|(t, _)| *t)
            .max()
            .map_or(ts(0), |latest| latest + chrono::Duration::seconds(1));
        state.blobs.insert(blob.clone(), (modified, content));
        Ok(())
    }
}

/// Activity log fed directly with lines, one batch per `push`.
pub struct FakeActivityLog {
    client_id: String,
    batches: Mutex<Vec<Vec<String>>>,
    reads: AtomicUsize,
}

impl FakeActivityLog {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            batches: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, lines: Vec<String>) {
        self.batches.lock().unwrap().push(lines);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivityLog for FakeActivityLog {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn read_since(&self, cursor: &LogCursor) -> Result<LogBatch, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let batches = self.batches.lock().unwrap();
        let start = cursor
            .position()
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(0);
        let lines = batches.iter().skip(start).flatten().cloned().collect();
        let cursor = if batches.len() > start {
            LogCursor::at(format!("{:06}", batches.len()))
        } else {
            cursor.clone()
        };
        Ok(LogBatch { lines, cursor })
    }
}

/// Activity log whose reads always fail.
pub struct BrokenActivityLog;

#[async_trait]
impl ActivityLog for BrokenActivityLog {
    fn client_id(&self) -> &str {
        "broken"
    }

    async fn read_since(&self, _cursor: &LogCursor) -> Result<LogBatch, StorageError> {
        Err(StorageError::InvalidUrl {
            url: "broken://".to_string(),
        })
    }
}
