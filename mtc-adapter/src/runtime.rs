use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mtc_core::Timestamp;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::adapter::ShdrAdapter;
use crate::listener::AdapterServer;
use crate::scheduler::run_interval;

/// A running adapter: listener plus interval flush.
pub struct AdapterRuntime {
    adapter: ShdrAdapter,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stopping: AtomicBool,
}

impl AdapterRuntime {
    /// Binds `addr` and spawns the accept loop and the interval flush.
    pub async fn start(
        adapter: ShdrAdapter,
        addr: SocketAddr,
        interval: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let server = AdapterServer::new(listener, adapter.clone());
        let local_addr = server.local_addr()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(server.serve(cancel.child_token()));
        tracker.spawn(run_interval(adapter.clone(), interval, cancel.child_token()));
        tracker.close();

        info!(%local_addr, interval_ms = interval.as_millis() as u64, "adapter started");

        Ok(Self {
            adapter,
            local_addr,
            cancel,
            tracker,
            stopping: AtomicBool::new(false),
        })
    }

    pub fn adapter(&self) -> &ShdrAdapter {
        &self.adapter
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that fires once the runtime is stopping.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Marks everything unavailable, makes a last flush, then stops every
    /// task and waits for them. Safe to call more than once or concurrently.
    pub async fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            let staged = self.adapter.set_unavailable(Timestamp::now());
            if staged > 0
                && let Err(e) = self.adapter.flush().await
            {
                warn!(error = %e, "final flush failed");
            }
            self.cancel.cancel();
        }

        self.tracker.wait().await;
        info!("adapter stopped");
    }
}
