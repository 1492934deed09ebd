use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::adapter::ShdrAdapter;

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accepts agent connections and runs one heartbeat task per connection.
pub struct AdapterServer {
    listener: TcpListener,
    adapter: ShdrAdapter,
}

impl AdapterServer {
    pub fn new(listener: TcpListener, adapter: ShdrAdapter) -> Self {
        Self { listener, adapter }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until `cancel` fires, then waits for every connection task.
    ///
    /// Accept errors are logged and retried after a short pause; they never
    /// end the loop.
    pub async fn serve(self, cancel: CancellationToken) {
        let tracker = TaskTracker::new();

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "failed to set TCP_NODELAY");
                    }
                    info!(%addr, "agent connection accepted");

                    let adapter = self.adapter.clone();
                    let cancel = cancel.child_token();
                    tracker.spawn(async move {
                        adapter.serve_connection(stream, Some(addr), cancel).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("adapter listener stopped");
    }
}
