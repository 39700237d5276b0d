//! Blob change detection.
//!
//! - `pattern` - Trigger and output path templates
//! - `index` - Per-container scan watermarks
//! - `scanner` - Full container listing on a background task
//! - `log_listener` - Activity log tailing
//! - `listener` - The composite listener polled by the scheduler

pub mod index;
pub mod listener;
pub mod log_listener;
pub mod pattern;
pub mod scanner;

pub use index::{BlobEntry, BlobEntryDateIndex, ScanWatermark};
pub use listener::{BlobListener, BlobNotifier};
pub use log_listener::{LogColumnId, LogRow, OperationType, ServiceType, StorageLogListener};
pub use pattern::{BlobPathPattern, Bindings};
pub use scanner::{ContainerScanner, ScanOutcome, ScanReport};
