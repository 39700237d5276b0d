use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    NotReady,
    Ready,
    Stopping,
}

impl HostState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HostState::NotReady,
            1 => HostState::Ready,
            _ => HostState::Stopping,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HostState::NotReady => 0,
            HostState::Ready => 1,
            HostState::Stopping => 2,
        }
    }
}

/// State shared by every component of one host.
///
/// Passed explicitly at construction. `Stopping` is terminal.
#[derive(Debug)]
pub struct HostContext {
    host_id: String,
    state: AtomicU8,
    shutdown: CancellationToken,
}

impl HostContext {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self::with_shutdown(host_id, CancellationToken::new())
    }

    pub fn with_shutdown(host_id: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self {
            host_id: host_id.into(),
            state: AtomicU8::new(HostState::NotReady.as_u8()),
            shutdown,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn state(&self) -> HostState {
        if self.shutdown.is_cancelled() {
            return HostState::Stopping;
        }
        HostState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == HostState::Ready
    }

    /// Move from `NotReady` to `Ready`. Has no effect once stopping.
    pub fn mark_ready(&self) {
        let swapped = self
            .state
            .compare_exchange(
                HostState::NotReady.as_u8(),
                HostState::Ready.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if swapped {
            info!(host = %self.host_id, "Host is ready");
        }
    }

    /// Enter `Stopping` and cancel the shutdown token.
    pub fn stop(&self) {
        self.state
            .store(HostState::Stopping.as_u8(), Ordering::Release);
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
