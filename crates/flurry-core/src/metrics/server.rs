//! Prometheus recorder and the host's status endpoint.
//!
//! The recorder is installed once per process. `init_test()` tolerates many
//! test threads racing to install it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Default metrics address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Histogram buckets in seconds. Invocations can run for minutes, so the
/// tail is longer than storage calls need.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Reports whether the host is accepting work.
pub type Readiness = Arc<dyn Fn() -> bool + Send + Sync>;

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Access to the installed recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

#[derive(Clone)]
struct ServerState {
    handle: PrometheusHandle,
    ready: Readiness,
}

/// Install the recorder and serve it on `addr`.
///
/// - `/metrics`: Prometheus text format
/// - `/health`: 200 while the process is up
/// - `/ready`: 200 once `ready` reports true, 503 before and during shutdown
pub fn init_global(addr: SocketAddr, ready: Readiness) -> Result<(), MetricsError> {
    let controller = install()?;
    let state = ServerState {
        handle: controller.handle.clone(),
        ready,
    };
    tokio::spawn(run_server(addr, state));

    info!(%addr, "Metrics server started");
    Ok(())
}

/// Install the recorder without an HTTP endpoint.
pub fn init_test() {
    if install().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

fn install() -> Result<&'static MetricsController, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())?;
    MetricsController::get()
}

impl MetricsController {
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

async fn run_server(addr: SocketAddr, state: ServerState) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "Metrics server error");
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> String {
    state.handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn ready_handler(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    if (state.ready)() {
        (StatusCode::OK, "ready\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_concurrent_init_test() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    init_test();
                    MetricsController::get().unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        init_test();
    }

    #[tokio::test]
    async fn test_ready_follows_host_state() {
        init_test();
        let flag = Arc::new(AtomicBool::new(false));
        let ready = flag.clone();
        let state = ServerState {
            handle: MetricsController::get().unwrap().handle.clone(),
            ready: Arc::new(move || ready.load(Ordering::SeqCst)),
        };

        let (status, _) = ready_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        flag.store(true, Ordering::SeqCst);
        let (status, body) = ready_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready\n");

        counter!("flurry_test_counter").increment(7);
        assert!(metrics_handler(State(state)).await.contains("flurry_test_counter"));
    }
}
