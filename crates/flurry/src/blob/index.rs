//! Per-container scan watermarks.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

use flurry_core::BlobPath;

/// A blob and the modification time fetched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub path: BlobPath,
    pub last_modified: DateTime<Utc>,
}

/// Latest modification time observed by a completed scan of one container.
///
/// Starts at the earliest representable time and never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanWatermark(DateTime<Utc>);

impl Default for ScanWatermark {
    fn default() -> Self {
        Self::baseline()
    }
}

impl ScanWatermark {
    /// Watermark of a container that has never been scanned.
    pub fn baseline() -> Self {
        Self(DateTime::<Utc>::MIN_UTC)
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time)
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_baseline(&self) -> bool {
        *self == Self::baseline()
    }

    /// True when `time` is strictly newer than this watermark.
    pub fn admits(&self, time: DateTime<Utc>) -> bool {
        time > self.0
    }

    /// Raise the watermark to `time` if it is later.
    pub fn observe(&mut self, time: DateTime<Utc>) {
        if time > self.0 {
            self.0 = time;
        }
    }
}

impl fmt::Display for ScanWatermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_baseline() {
            f.write_str("baseline")
        } else {
            write!(f, "{}", self.0.to_rfc3339())
        }
    }
}

/// Tracks, per container, the most recent modification time seen by a full scan.
#[derive(Debug, Default)]
pub struct BlobEntryDateIndex {
    watermarks: HashMap<String, ScanWatermark>,
}

impl BlobEntryDateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current watermark for `container`; the baseline if it was never scanned.
    pub fn watermark(&self, container: &str) -> ScanWatermark {
        self.watermarks
            .get(container)
            .copied()
            .unwrap_or_default()
    }

    /// Fold a completed scan's watermark into the index. Never lowers the stored value.
    pub fn record(&mut self, container: &str, watermark: ScanWatermark) -> ScanWatermark {
        let stored = self.watermarks.entry(container.to_string()).or_default();
        stored.observe(watermark.time());
        *stored
    }

    /// True when `entry` is newer than its container's watermark.
    pub fn is_new(&self, entry: &BlobEntry) -> bool {
        self.watermark(entry.path.container())
            .admits(entry.last_modified)
    }

    pub fn len(&self) -> usize {
        self.watermarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watermarks.is_empty()
    }
}
