//! Seams between the adapter client and the agent it feeds.

use async_trait::async_trait;
use mtc_core::{Asset, DataItemDescriptor, Device, Observation, Timestamp};

/// Read-only view of the agent's device model.
pub trait DeviceLookup: Send + Sync {
    /// Resolves a data item by id or name on the device named by uuid or name.
    fn data_item(&self, device: &str, key: &str) -> Option<DataItemDescriptor>;

    fn device_data_items(&self, device: &str) -> Vec<DataItemDescriptor>;

    fn device_uuid(&self, device: &str) -> Option<String>;
}

/// Per-adapter handling flags passed with every observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationOptions {
    /// Replace adapter timestamps with the agent's receipt time.
    pub ignore_timestamp: bool,
    /// Convert from the adapter's native units where the sink knows them.
    pub convert_units: bool,
    /// Upper-case textual event values.
    pub ignore_case: bool,
}

/// Where decoded SHDR ends up.
#[async_trait]
pub trait AgentSink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn add_observation(
        &self,
        device_uuid: &str,
        observation: Observation,
        options: ObservationOptions,
    ) -> Result<(), Self::Error>;

    async fn add_asset(
        &self,
        device_uuid: &str,
        asset: Asset,
        ignore_timestamp: bool,
    ) -> Result<bool, Self::Error>;

    async fn remove_asset(
        &self,
        device_uuid: &str,
        asset_id: &str,
        timestamp: Timestamp,
    ) -> Result<bool, Self::Error>;

    /// Removes every asset of the device, or only those of `asset_type`.
    async fn remove_all_assets(
        &self,
        device_uuid: &str,
        asset_type: Option<&str>,
        timestamp: Timestamp,
    ) -> Result<bool, Self::Error>;

    async fn add_device(&self, device: Device) -> Result<(), Self::Error>;

    async fn remove_device(&self, uuid: &str, timestamp: Timestamp) -> Result<bool, Self::Error>;

    async fn remove_all_devices(&self, timestamp: Timestamp) -> Result<(), Self::Error>;
}
