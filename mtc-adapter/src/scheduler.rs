use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::adapter::ShdrAdapter;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Sleep before the next tick so ticks stay `interval` apart however long
/// the flush took.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_DELAY)
}

/// Flushes the adapter every `interval` until cancelled.
///
/// Cancellation is only observed between flushes, so a flush in progress
/// always completes. Failed flushes are retried on the next tick.
pub async fn run_interval(adapter: ShdrAdapter, interval: Duration, cancel: CancellationToken) {
    info!(interval_ms = interval.as_millis() as u64, "interval flush started");

    loop {
        let started = Instant::now();

        match adapter.flush().await {
            Ok(0) => {}
            Ok(sent) => trace!(sent, "flushed"),
            Err(e) => debug!(error = %e, "flush failed, retrying next tick"),
        }

        let delay = next_delay(interval, started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("interval flush stopped");
}
