//! Activity log stored alongside the blobs it describes.
//!
//! Log files live at `$logs/blob/YYYY/MM/DD/HH00/NNNNNN.log`, one hour per
//! directory. Each file holds newline separated log lines and is read once.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use object_store::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{ActivityLog, LogBatch, LogCursor, StorageProviderRef};
use crate::error::StorageError;

/// Root of the blob service's activity log.
pub const LOG_ROOT: &str = "$logs/blob";

fn hour_prefix(time: DateTime<Utc>) -> String {
    time.format("%Y/%m/%d/%H00").to_string()
}

/// Key of a log file relative to [`LOG_ROOT`].
pub fn log_file_key(time: DateTime<Utc>, sequence: u32) -> String {
    format!("{}/{sequence:06}.log", hour_prefix(time))
}

fn sequence_of(key: &str) -> Option<u32> {
    key.rsplit('/').next()?.strip_suffix(".log")?.parse().ok()
}

/// [`ActivityLog`] reading log files from a storage account.
pub struct StoreActivityLog {
    storage: StorageProviderRef,
    client_id: String,
    hours_window: u32,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for StoreActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreActivityLog<{}>", self.client_id)
    }
}

impl StoreActivityLog {
    /// Open the activity log of `storage`, probing that it can be listed.
    ///
    /// `hours_window` is how many hour directories are searched per read,
    /// counting the current one. Looking back absorbs clock skew between the
    /// host and the storage service.
    pub async fn connect(
        storage: StorageProviderRef,
        client_id: impl Into<String>,
        hours_window: u32,
    ) -> Result<Self, StorageError> {
        storage.list(&Path::from(LOG_ROOT)).await?;
        Ok(Self {
            storage,
            client_id: client_id.into(),
            hours_window: hours_window.max(1),
            append_lock: Mutex::new(()),
        })
    }

    async fn list_window(&self, now: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for hours_back in 0..self.hours_window {
            let hour = hour_prefix(now - Duration::hours(i64::from(hours_back)));
            let prefix = Path::from(format!("{LOG_ROOT}/{hour}"));
            for meta in self.storage.list(&prefix).await? {
                if let Some(key) = meta.location.as_ref().strip_prefix(LOG_ROOT) {
                    keys.push(key.trim_start_matches('/').to_string());
                }
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Append `lines` as a new log file in the current hour.
    ///
    /// Stores without a service-maintained log use this to record their own
    /// writes. Returns the key of the new file.
    pub async fn append(&self, lines: &[String]) -> Result<String, StorageError> {
        let _guard = self.append_lock.lock().await;
        let now = Utc::now();
        let prefix = Path::from(format!("{LOG_ROOT}/{}", hour_prefix(now)));

        let next = self
            .storage
            .list(&prefix)
            .await?
            .iter()
            .filter_map(|meta| sequence_of(meta.location.as_ref()))
            .max()
            .map_or(0, |max| max + 1);

        let key = log_file_key(now, next);
        let mut content = lines.join("\n");
        content.push('\n');
        self.storage
            .put(&Path::from(format!("{LOG_ROOT}/{key}")), Bytes::from(content))
            .await?;
        trace!(client = %self.client_id, key = %key, lines = lines.len(), "Appended activity log file");
        Ok(key)
    }
}

#[async_trait]
impl ActivityLog for StoreActivityLog {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn read_since(&self, cursor: &LogCursor) -> Result<LogBatch, StorageError> {
        let mut batch = LogBatch {
            lines: Vec::new(),
            cursor: cursor.clone(),
        };

        for key in self.list_window(Utc::now()).await? {
            if !cursor.is_before(&key) {
                continue;
            }
            let content = match self
                .storage
                .get(&Path::from(format!("{LOG_ROOT}/{key}")))
                .await
            {
                Ok(content) => content,
                Err(e) if e.is_not_found() => {
                    debug!(client = %self.client_id, key = %key, "Log file expired before it was read");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let text = String::from_utf8_lossy(&content);
            batch.lines.extend(
                text.lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string),
            );
            batch.cursor.advance(LogCursor::at(key));
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn test_log_file_key_layout() {
        let time = Utc.with_ymd_and_hms(2026, 3, 7, 9, 41, 0).unwrap();
        assert_eq!(log_file_key(time, 12), "2026/03/07/0900/000012.log");
        assert_eq!(sequence_of("2026/03/07/0900/000012.log"), Some(12));
        assert_eq!(sequence_of("2026/03/07/0900/readme"), None);
    }

    #[tokio::test]
    async fn test_read_since_advances_cursor() {
        let storage = Arc::new(StorageProvider::in_memory());
        let log = StoreActivityLog::connect(storage, "devstore", 2).await.unwrap();

        log.append(&["one".to_string(), "two".to_string()]).await.unwrap();
        let first = log.read_since(&LogCursor::default()).await.unwrap();
        assert_eq!(first.lines, vec!["one", "two"]);

        let empty = log.read_since(&first.cursor).await.unwrap();
        assert!(empty.lines.is_empty());
        assert_eq!(empty.cursor, first.cursor);

        log.append(&["three".to_string()]).await.unwrap();
        let next = log.read_since(&first.cursor).await.unwrap();
        assert_eq!(next.lines, vec!["three"]);
    }

    #[tokio::test]
    async fn test_files_outside_window_ignored() {
        let storage = Arc::new(StorageProvider::in_memory());
        let stale = Utc::now() - Duration::hours(5);
        storage
            .put(
                &Path::from(format!("{LOG_ROOT}/{}", log_file_key(stale, 0))),
                Bytes::from_static(b"old\n"),
            )
            .await
            .unwrap();

        let log = StoreActivityLog::connect(storage, "devstore", 2).await.unwrap();
        let batch = log.read_since(&LogCursor::default()).await.unwrap();
        assert!(batch.lines.is_empty());
    }
}
