//! Coordinated shutdown: refuse new upgrades, close every connection with
//! 1001, stop the acceptor, then wait for connection tasks to flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use relay_core::close_code;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Reason sent with the 1001 close frame on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// How long `stop` waits for connection tasks before giving up on them.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared shutdown state for the acceptor and every connection task.
pub struct ShutdownCoordinator {
    stopping: AtomicBool,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the running state.
    pub fn new() -> Self {
        Self {
            stopping: AtomicBool::new(false),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Enter the stopping state. Returns `false` if already stopping.
    pub fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    /// Whether shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Token cancelled once the acceptor should stop.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker for per-connection tasks.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Close every registered connection with 1001 and remove it from the
    /// registry. Connections already closing are removed without a second
    /// close. Returns how many close frames were requested.
    pub async fn close_all(&self, registry: &ConnectionRegistry) -> usize {
        let mut closed = 0;
        let mut ids = Vec::new();
        registry
            .for_each(|conn| {
                if conn.close(Some(close_code::GOING_AWAY), SHUTDOWN_REASON) {
                    closed += 1;
                }
                ids.push(conn.id().clone());
            })
            .await;
        for id in &ids {
            let _ = registry.unregister(id).await;
        }
        info!(closed, swept = ids.len(), "closed all connections");
        closed
    }

    /// Stop the acceptor.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait up to `timeout` for tracked tasks. Returns `true` if they all
    /// finished.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.tracker.close();
        let pending = self.tracker.len();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            true
        } else {
            warn!(pending, "connection tasks still running after {timeout:?}");
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
