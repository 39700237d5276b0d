//! Composite blob listener: startup scans plus activity log tailing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{BlobsDiscovered, DiscoverySource};
use flurry_core::{ActivityLog, BlobPath, BlobStore, StorageError};

use super::index::{BlobEntry, BlobEntryDateIndex, ScanWatermark};
use super::log_listener::StorageLogListener;
use super::scanner::{ContainerScanner, ScanReport};
use crate::trigger::TriggerCandidate;

type ScanTask = (String, Result<ScanReport, StorageError>);

/// Handle for pushing blobs into a [`BlobListener`] from elsewhere in the host.
#[derive(Debug, Clone)]
pub struct BlobNotifier {
    tx: mpsc::UnboundedSender<BlobPath>,
}

impl BlobNotifier {
    /// Queue `path` for the listener's next poll.
    pub fn notify(&self, path: BlobPath) {
        if self.tx.send(path).is_err() {
            debug!("Blob listener is gone, dropping notification");
        }
    }
}

/// Polls a fixed set of containers for new or changed blobs.
///
/// Each poll delivers whatever background scans have produced so far, any
/// notified blobs, and the writes reported by the activity logs. Delivery is
/// neither ordered nor deduplicated.
pub struct BlobListener {
    scanner: ContainerScanner,
    containers: BTreeSet<String>,
    log_listeners: Vec<StorageLogListener>,
    index: BlobEntryDateIndex,
    rescan_interval: Option<Duration>,

    scan_tx: mpsc::UnboundedSender<BlobEntry>,
    scan_rx: mpsc::UnboundedReceiver<BlobEntry>,
    notify_tx: mpsc::UnboundedSender<BlobPath>,
    notify_rx: mpsc::UnboundedReceiver<BlobPath>,

    scans: JoinSet<ScanTask>,
    scanning: HashSet<String>,
    last_scan: HashMap<String, Instant>,
    initial_scan_started: bool,
}

impl std::fmt::Debug for BlobListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobListener")
            .field("containers", &self.containers)
            .field("log_listeners", &self.log_listeners)
            .field("scanning", &self.scanning)
            .field("initial_scan_started", &self.initial_scan_started)
            .finish()
    }
}

impl BlobListener {
    /// Listener over `containers`. Container names are matched case-insensitively.
    pub fn new(store: Arc<dyn BlobStore>, containers: impl IntoIterator<Item = String>) -> Self {
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            scanner: ContainerScanner::new(store),
            containers: containers
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            log_listeners: Vec::new(),
            index: BlobEntryDateIndex::new(),
            rescan_interval: None,
            scan_tx,
            scan_rx,
            notify_tx,
            notify_rx,
            scans: JoinSet::new(),
            scanning: HashSet::new(),
            last_scan: HashMap::new(),
            initial_scan_started: false,
        }
    }

    /// Attach activity log clients.
    ///
    /// Clients that failed to connect are logged and left out. Clients with
    /// the same identity share one log tail.
    pub fn with_log_clients(
        mut self,
        clients: impl IntoIterator<Item = Result<Arc<dyn ActivityLog>, StorageError>>,
    ) -> Self {
        for client in clients {
            match client {
                Ok(log) => {
                    if self
                        .log_listeners
                        .iter()
                        .any(|l| l.client_id() == log.client_id())
                    {
                        continue;
                    }
                    info!(client = %log.client_id(), "Tailing activity log");
                    self.log_listeners.push(StorageLogListener::new(log));
                }
                Err(e) => warn!(error = %e, "Activity log unavailable, relying on scans"),
            }
        }
        self
    }

    /// Rescan every container this often after its previous scan finished.
    pub fn with_rescan_interval(mut self, interval: Option<Duration>) -> Self {
        self.rescan_interval = interval.filter(|i| !i.is_zero());
        self
    }

    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(String::as_str)
    }

    pub fn has_log_listeners(&self) -> bool {
        !self.log_listeners.is_empty()
    }

    pub fn watermark(&self, container: &str) -> ScanWatermark {
        self.index.watermark(container)
    }

    pub fn notifier(&self) -> BlobNotifier {
        BlobNotifier {
            tx: self.notify_tx.clone(),
        }
    }

    /// Queue `path` for the next poll.
    pub fn notify(&self, path: BlobPath) {
        self.notifier().notify(path);
    }

    /// True while any background scan is still running.
    pub fn is_scanning(&self) -> bool {
        !self.scanning.is_empty()
    }

    /// Deliver every blob found since the previous poll. Returns the number delivered.
    ///
    /// Never waits for background scans. `cancel` stops scans started by this
    /// listener and skips the remaining log queries of this poll.
    pub async fn poll(
        &mut self,
        cancel: &CancellationToken,
        mut callback: impl FnMut(TriggerCandidate) + Send,
    ) -> usize {
        if !self.initial_scan_started {
            self.initial_scan_started = true;
            let containers: Vec<String> = self.containers.iter().cloned().collect();
            for container in containers {
                self.start_scan(container, cancel);
            }
        }

        self.reap_scans();
        self.start_due_rescans(cancel);

        let mut delivered = 0;
        while let Ok(entry) = self.scan_rx.try_recv() {
            callback(TriggerCandidate::blob(entry.path, DiscoverySource::Scan));
            delivered += 1;
        }

        let mut notified = 0u64;
        while let Ok(path) = self.notify_rx.try_recv() {
            if self.containers.contains(path.container()) {
                callback(TriggerCandidate::blob(path, DiscoverySource::Notification));
                notified += 1;
            }
        }
        if notified > 0 {
            emit!(BlobsDiscovered {
                count: notified,
                source: DiscoverySource::Notification,
            });
        }
        delivered += notified as usize;

        for listener in &mut self.log_listeners {
            if cancel.is_cancelled() {
                break;
            }
            let writes = match listener.get_recent_writes().await {
                Ok(writes) => writes,
                Err(e) => {
                    warn!(client = %listener.client_id(), error = %e, "Failed to read activity log");
                    continue;
                }
            };
            for path in writes {
                if self.containers.contains(path.container()) {
                    callback(TriggerCandidate::blob(path, DiscoverySource::Log));
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Cancel and wait for all background scans.
    pub async fn shutdown(&mut self) {
        self.scans.abort_all();
        while self.scans.join_next().await.is_some() {}
        self.scanning.clear();
    }

    fn start_scan(&mut self, container: String, cancel: &CancellationToken) {
        if !self.scanning.insert(container.clone()) {
            return;
        }
        let watermark = self.index.watermark(&container);
        debug!(container = %container, watermark = %watermark, "Starting background scan");
        let handle = AbortOnDropHandle::new(self.scanner.spawn(
            container.clone(),
            watermark,
            cancel.child_token(),
            self.scan_tx.clone(),
        ));
        self.scans.spawn(async move {
            let result = handle.await.unwrap_or_else(|e| {
                if e.is_panic() {
                    warn!(container = %container, error = %e, "Scan task panicked");
                }
                Ok(ScanReport {
                    container: container.clone(),
                    watermark,
                    yielded: 0,
                    complete: false,
                })
            });
            (container, result)
        });
    }

    fn reap_scans(&mut self) {
        while let Some(joined) = self.scans.try_join_next() {
            let (container, result) = match joined {
                Ok(task) => task,
                Err(e) => {
                    debug!(error = %e, "Scan task ended without a result");
                    continue;
                }
            };
            self.scanning.remove(&container);
            self.last_scan.insert(container.clone(), Instant::now());

            match result {
                Ok(report) if report.complete => {
                    let stored = self.index.record(&container, report.watermark);
                    debug!(container = %container, yielded = report.yielded, watermark = %stored, "Scan finished");
                }
                Ok(report) => {
                    debug!(container = %container, yielded = report.yielded, "Scan incomplete, keeping watermark");
                }
                Err(e) => warn!(container = %container, error = %e, "Container scan failed"),
            }
        }
    }

    fn start_due_rescans(&mut self, cancel: &CancellationToken) {
        let Some(interval) = self.rescan_interval else {
            return;
        };
        if cancel.is_cancelled() {
            return;
        }
        let due: Vec<String> = self
            .containers
            .iter()
            .filter(|c| !self.scanning.contains(*c))
            .filter(|c| {
                self.last_scan
                    .get(*c)
                    .is_some_and(|finished| finished.elapsed() >= interval)
            })
            .cloned()
            .collect();
        for container in due {
            self.start_scan(container, cancel);
        }
    }
}

impl Drop for BlobListener {
    fn drop(&mut self) {
        self.scans.abort_all();
    }
}
