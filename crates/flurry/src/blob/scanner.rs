//! Full listing of a container, filtered by a watermark.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{BlobsDiscovered, ContainerScanCompleted, DiscoverySource};
use flurry_core::{BlobStore, StorageError};

use super::index::{BlobEntry, ScanWatermark};

/// Summary of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub container: String,
    /// Watermark to store for the container.
    pub watermark: ScanWatermark,
    /// Entries newer than the pre-scan watermark that were yielded.
    pub yielded: usize,
    /// False when the scan stopped early or skipped a blob it could not read.
    pub complete: bool,
}

/// Result of [`ContainerScanner::scan`].
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub entries: Vec<BlobEntry>,
    pub report: ScanReport,
}

/// Lists a container and yields the blobs newer than a watermark.
#[derive(Clone)]
pub struct ContainerScanner {
    store: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for ContainerScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContainerScanner")
    }
}

impl ContainerScanner {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Scan `container`, collecting the entries newer than `watermark`.
    pub async fn scan(
        &self,
        container: &str,
        watermark: ScanWatermark,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, StorageError> {
        let mut entries = Vec::new();
        let report = self
            .scan_with(container, watermark, cancel, |entry| {
                entries.push(entry);
                true
            })
            .await?;
        Ok(ScanOutcome { entries, report })
    }

    /// Run a scan on its own task, pushing each entry into `sink` as it is found.
    ///
    /// The task resolves to the scan report. Entries already pushed stay valid
    /// if the scan is cancelled or the receiver goes away.
    pub fn spawn(
        &self,
        container: String,
        watermark: ScanWatermark,
        cancel: CancellationToken,
        sink: mpsc::UnboundedSender<BlobEntry>,
    ) -> JoinHandle<Result<ScanReport, StorageError>> {
        let scanner = self.clone();
        tokio::spawn(async move {
            scanner
                .scan_with(&container, watermark, &cancel, |entry| sink.send(entry).is_ok())
                .await
        })
    }

    /// Core scan loop. `sink` returns false to stop early.
    ///
    /// The new watermark is the latest timestamp seen across every listed blob,
    /// including those at or below the old watermark. It is only raised when
    /// the scan visits every listed blob.
    async fn scan_with(
        &self,
        container: &str,
        watermark: ScanWatermark,
        cancel: &CancellationToken,
        mut sink: impl FnMut(BlobEntry) -> bool + Send,
    ) -> Result<ScanReport, StorageError> {
        let start = Instant::now();
        let mut report = ScanReport {
            container: container.to_string(),
            watermark,
            yielded: 0,
            complete: true,
        };

        let Some(items) = self.store.list_blobs(container).await? else {
            debug!(container, "Container does not exist, creating it");
            if let Err(e) = self.store.create_container_if_missing(container).await {
                warn!(container, error = %e, "Failed to create missing container");
            }
            return Ok(report);
        };

        let mut latest = watermark;
        for item in items {
            if cancel.is_cancelled() {
                debug!(container, yielded = report.yielded, "Scan cancelled");
                report.complete = false;
                break;
            }

            let attributes = match self.store.fetch_attributes(&item.path).await {
                Ok(Some(attributes)) => attributes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(container, blob = %item.path, error = %e, "Failed to fetch blob attributes");
                    report.complete = false;
                    continue;
                }
            };

            latest.observe(attributes.last_modified);
            if watermark.admits(attributes.last_modified) {
                report.yielded += 1;
                let entry = BlobEntry {
                    path: item.path,
                    last_modified: attributes.last_modified,
                };
                if !sink(entry) {
                    report.complete = false;
                    break;
                }
            }
        }

        if report.complete {
            report.watermark = latest;
        }

        emit!(BlobsDiscovered {
            count: report.yielded as u64,
            source: DiscoverySource::Scan,
        });
        emit!(ContainerScanCompleted {
            container: container.to_string(),
            entries: report.yielded as u64,
            duration: start.elapsed(),
        });
        debug!(
            container,
            yielded = report.yielded,
            watermark = %report.watermark,
            complete = report.complete,
            "Container scan finished"
        );
        Ok(report)
    }
}
