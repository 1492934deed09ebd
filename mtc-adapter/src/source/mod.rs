//! Data sources that feed an adapter.

pub mod mock;

use async_trait::async_trait;
use mtc_core::{Asset, FaultState, Observation, Timestamp};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::ShdrAdapter;

#[derive(Debug, Clone)]
pub enum SourceEvent {
    Observation(Observation),
    FaultState { key: String, state: FaultState },
    Asset(Asset),
}

/// Something that produces machine data until cancelled.
#[async_trait]
pub trait MachineSource {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<SourceEvent>, Self::Error>;
}

/// Applies source events to the adapter until the channel closes.
pub async fn pump(adapter: ShdrAdapter, mut rx: mpsc::Receiver<SourceEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SourceEvent::Observation(observation) => {
                if !adapter.add_observation(observation) {
                    debug!("observation not staged");
                }
            }
            SourceEvent::FaultState { key, state } => {
                adapter.add_fault_state(key, state, Timestamp::UNSET);
            }
            SourceEvent::Asset(asset) => {
                if let Err(e) = adapter.send_asset(asset).await {
                    warn!(error = %e, "failed to send asset");
                }
            }
        }
    }

    info!("source channel closed");
}
