//! Blob write discovery from the storage activity log.
//!
//! Log lines are semicolon separated with fixed column positions. Quoted
//! columns may contain semicolons and use `""` for a literal quote.

use chrono::{DateTime, SecondsFormat, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

use flurry_core::emit;
use flurry_core::metrics::events::{BlobsDiscovered, DiscoverySource, LogLinesSkipped};
use flurry_core::{ActivityLog, BlobPath, LogCursor, StorageError};

/// Column positions of a version 1.0 log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LogColumnId {
    VersionNumber = 0,
    RequestStartTime = 1,
    OperationType = 2,
    RequestStatus = 3,
    HttpStatusCode = 4,
    EndToEndLatencyInMs = 5,
    ServerLatencyInMs = 6,
    AuthenticationType = 7,
    RequesterAccountName = 8,
    OwnerAccountName = 9,
    ServiceType = 10,
    RequestUrl = 11,
    RequestedObjectKey = 12,
    RequestIdHeader = 13,
    OperationCount = 14,
    RequesterIpAddress = 15,
    RequestVersionHeader = 16,
    RequestHeaderSize = 17,
    RequestPacketSize = 18,
    ResponseHeaderSize = 19,
    ResponsePacketSize = 20,
    RequestContentLength = 21,
    RequestMd5 = 22,
    ServerMd5 = 23,
    ETagIdentifier = 24,
    LastModifiedTime = 25,
    ConditionsUsed = 26,
    UserAgentHeader = 27,
    ReferrerHeader = 28,
    ClientRequestId = 29,
}

impl LogColumnId {
    /// Number of columns in a complete line.
    pub const COUNT: usize = 30;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Storage service that handled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Blob,
    Queue,
    Table,
}

impl FromStr for ServiceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blob" => Ok(ServiceType::Blob),
            "queue" => Ok(ServiceType::Queue),
            "table" => Ok(ServiceType::Table),
            _ => Err(()),
        }
    }
}

macro_rules! operation_types {
    ($($op:ident),* $(,)?) => {
        /// Blob service operations recorded in the log.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum OperationType {
            $($op,)*
        }

        impl OperationType {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(OperationType::$op => stringify!($op),)*
                }
            }
        }

        impl FromStr for OperationType {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($op) => Ok(OperationType::$op),)*
                    _ => Err(()),
                }
            }
        }
    };
}

operation_types! {
    AcquireBlobLease,
    AcquireContainerLease,
    BreakBlobLease,
    BreakContainerLease,
    ChangeBlobLease,
    ChangeContainerLease,
    CopyBlob,
    CopyBlobDestination,
    CopyBlobSource,
    CreateContainer,
    DeleteBlob,
    DeleteContainer,
    GetBlob,
    GetBlobMetadata,
    GetBlobProperties,
    GetBlockList,
    GetContainerAcl,
    GetContainerMetadata,
    GetContainerProperties,
    GetLeaseInfo,
    GetPageRegions,
    LeaseBlob,
    ListBlobs,
    ListContainers,
    PutBlob,
    PutBlock,
    PutBlockList,
    PutPage,
    ReleaseBlobLease,
    ReleaseContainerLease,
    RenewBlobLease,
    RenewContainerLease,
    SetBlobMetadata,
    SetBlobProperties,
    SetContainerAcl,
    SetContainerMetadata,
    SnapshotBlob,
}

impl OperationType {
    /// True for operations that create or change a blob's content or properties.
    pub fn is_blob_write(&self) -> bool {
        matches!(
            self,
            OperationType::PutBlob
                | OperationType::PutBlockList
                | OperationType::CopyBlob
                | OperationType::CopyBlobDestination
                | OperationType::CopyBlobSource
                | OperationType::SetBlobMetadata
                | OperationType::SetBlobProperties
        )
    }
}

/// Split a line on `;`, honouring double-quoted columns.
fn split_columns(line: &str) -> Vec<String> {
    let mut columns = Vec::with_capacity(LogColumnId::COUNT);
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ';' if !quoted => columns.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    columns.push(current);
    columns
}

/// The columns of a log line this host cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub request_start_time: DateTime<Utc>,
    pub service_type: ServiceType,
    /// `None` for operations this host does not know.
    pub operation_type: Option<OperationType>,
    pub requested_object_key: String,
}

impl LogRow {
    /// Parse a raw line. Returns `None` for lines that are malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let columns = split_columns(line.trim_end_matches(['\r', '\n']));
        let column = |id: LogColumnId| columns.get(id.index()).map(String::as_str);

        let request_start_time = DateTime::parse_from_rfc3339(column(LogColumnId::RequestStartTime)?)
            .ok()?
            .with_timezone(&Utc);
        let service_type = column(LogColumnId::ServiceType)?.parse().ok()?;
        let operation_type = column(LogColumnId::OperationType)?.parse().ok();
        let requested_object_key = column(LogColumnId::RequestedObjectKey)?.to_string();

        Some(Self {
            request_start_time,
            service_type,
            operation_type,
            requested_object_key,
        })
    }

    /// Blob addressed by `/account/container/blob`.
    pub fn to_path(&self) -> Option<BlobPath> {
        let key = self.requested_object_key.trim_start_matches('/');
        let (_account, rest) = key.split_once('/')?;
        BlobPath::parse(rest).ok()
    }

    pub fn is_blob_write(&self) -> bool {
        self.service_type == ServiceType::Blob
            && self.operation_type.is_some_and(|op| op.is_blob_write())
    }

    /// Format a complete log line recording a successful blob write.
    pub fn format_write(
        time: DateTime<Utc>,
        operation: OperationType,
        account: &str,
        path: &BlobPath,
    ) -> String {
        let mut columns = vec![String::new(); LogColumnId::COUNT];
        let mut set = |id: LogColumnId, value: String| columns[id.index()] = value;
        set(LogColumnId::VersionNumber, "1.0".into());
        set(
            LogColumnId::RequestStartTime,
            time.to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        set(LogColumnId::OperationType, operation.as_str().into());
        set(LogColumnId::RequestStatus, "Success".into());
        set(LogColumnId::HttpStatusCode, "201".into());
        set(LogColumnId::AuthenticationType, "authenticated".into());
        set(LogColumnId::RequesterAccountName, account.into());
        set(LogColumnId::OwnerAccountName, account.into());
        set(LogColumnId::ServiceType, "blob".into());
        set(LogColumnId::RequestedObjectKey, quote(&format!("/{account}/{path}")));
        set(LogColumnId::RequestIdHeader, uuid::Uuid::new_v4().to_string());
        set(LogColumnId::OperationCount, "0".into());
        columns.join(";")
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Tails one activity log and reports the blobs written since the last call.
pub struct StorageLogListener {
    log: Arc<dyn ActivityLog>,
    cursor: LogCursor,
}

impl std::fmt::Debug for StorageLogListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLogListener")
            .field("client", &self.log.client_id())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl StorageLogListener {
    pub fn new(log: Arc<dyn ActivityLog>) -> Self {
        Self {
            log,
            cursor: LogCursor::default(),
        }
    }

    pub fn client_id(&self) -> &str {
        self.log.client_id()
    }

    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Blobs written since the previous call, in log order. May contain duplicates.
    pub async fn get_recent_writes(&mut self) -> Result<Vec<BlobPath>, StorageError> {
        let batch = self.log.read_since(&self.cursor).await?;
        self.cursor.advance(batch.cursor);

        let mut skipped = 0u64;
        let mut writes = Vec::new();
        for line in &batch.lines {
            match LogRow::parse(line) {
                Some(row) if row.is_blob_write() => match row.to_path() {
                    Some(path) => writes.push(path),
                    None => skipped += 1,
                },
                Some(_) => {}
                None => {
                    trace!(client = %self.log.client_id(), line = %line, "Skipping malformed log line");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            emit!(LogLinesSkipped { count: skipped });
        }
        if !writes.is_empty() {
            emit!(BlobsDiscovered {
                count: writes.len() as u64,
                source: DiscoverySource::Log,
            });
            debug!(client = %self.log.client_id(), count = writes.len(), "Found blob writes in activity log");
        }
        Ok(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeActivityLog, blob, ts};

    const SAMPLE: &str = r#"1.0;2026-10-14T09:41:05.3192615Z;PutBlob;Success;201;21;21;authenticated;devstore;devstore;blob;"https://devstore.blob.core.windows.net/input/a;b.csv";"/devstore/input/a;b.csv";8e1f2b1c-0001-0000-0000-000000000000;0;10.0.0.1:53114;2014-02-14;350;12;163;0;12;;"q+Y5gz9yx1k=";"0x8D1595E91A37ADB";Tuesday, 14-Oct-26 09:41:05 GMT;;"Azure-Storage/4.0.1";;"b7b5c2ad""x""""#;

    #[test]
    fn test_parse_sample_line() {
        let row = LogRow::parse(SAMPLE).unwrap();
        assert_eq!(row.service_type, ServiceType::Blob);
        assert_eq!(row.operation_type, Some(OperationType::PutBlob));
        assert_eq!(row.requested_object_key, "/devstore/input/a;b.csv");
        assert_eq!(row.to_path(), Some(blob("input/a;b.csv")));
        assert!(row.is_blob_write());
    }

    #[test]
    fn test_split_handles_escaped_quotes() {
        let columns = split_columns(r#"a;"b;""c""";d"#);
        assert_eq!(columns, vec!["a", r#"b;"c""#, "d"]);
    }

    #[test]
    fn test_malformed_and_foreign_lines() {
        assert!(LogRow::parse("").is_none());
        assert!(LogRow::parse("1.0;not-a-time;PutBlob").is_none());

        let queue_line = SAMPLE.replace(";blob;", ";queue;");
        let row = LogRow::parse(&queue_line).unwrap();
        assert!(!row.is_blob_write());

        let read_line = SAMPLE.replace(";PutBlob;", ";GetBlob;");
        assert!(!LogRow::parse(&read_line).unwrap().is_blob_write());

        let unknown = SAMPLE.replace(";PutBlob;", ";FutureOperation;");
        let row = LogRow::parse(&unknown).unwrap();
        assert_eq!(row.operation_type, None);
        assert!(!row.is_blob_write());
    }

    #[test]
    fn test_format_write_parses_back() {
        let path = blob("output/x \"quoted\".csv");
        let line = LogRow::format_write(ts(3), OperationType::PutBlob, "devstore", &path);

        let row = LogRow::parse(&line).unwrap();
        assert_eq!(row.request_start_time, ts(3));
        assert_eq!(row.to_path(), Some(path));
    }

    #[tokio::test]
    async fn test_get_recent_writes_advances() {
        let log = Arc::new(FakeActivityLog::new("devstore"));
        let mut listener = StorageLogListener::new(log.clone());

        log.push(vec![
            LogRow::format_write(ts(1), OperationType::PutBlob, "devstore", &blob("input/a.csv")),
            "garbage".to_string(),
            LogRow::format_write(ts(2), OperationType::GetBlob, "devstore", &blob("input/b.csv")),
            LogRow::format_write(ts(3), OperationType::CopyBlob, "devstore", &blob("other/c.csv")),
        ]);

        let writes = listener.get_recent_writes().await.unwrap();
        assert_eq!(writes, vec![blob("input/a.csv"), blob("other/c.csv")]);

        assert!(listener.get_recent_writes().await.unwrap().is_empty());
        assert_eq!(log.reads(), 2);
    }
}
