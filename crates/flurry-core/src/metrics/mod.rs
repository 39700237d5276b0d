//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder plus the metrics and readiness endpoints

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, Readiness, init_global, init_test};

/// Macro for emitting metric events (Vector-style pattern).
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use flurry_core::metrics::events::{BlobsDiscovered, DiscoverySource};
///
/// emit!(BlobsDiscovered { count: 3, source: DiscoverySource::Scan });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
