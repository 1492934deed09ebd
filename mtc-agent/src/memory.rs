use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mtc_core::{Asset, DataItemDescriptor, Device, Observation, Timestamp, Value};
use tokio::sync::RwLock;

use crate::config::DeviceModel;
use crate::sink::{AgentSink, DeviceLookup, ObservationOptions};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
}

/// An observation as recorded by the agent, keyed by data item id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObservation {
    pub device_uuid: String,
    pub data_item_id: String,
    pub observation: Observation,
}

/// Agent state held in memory: a fixed device model plus everything
/// adapters have reported against it.
#[derive(Clone)]
pub struct InMemoryAgent {
    devices: Arc<Vec<DeviceModel>>,
    observations: Arc<RwLock<Vec<StoredObservation>>>,
    current: Arc<RwLock<HashMap<(String, String), Observation>>>,
    assets: Arc<RwLock<HashMap<String, (String, Asset)>>>,
    documents: Arc<RwLock<HashMap<String, Device>>>,
}

impl InMemoryAgent {
    pub fn new(devices: Vec<DeviceModel>) -> Self {
        Self {
            devices: Arc::new(devices),
            observations: Arc::new(RwLock::new(Vec::new())),
            current: Arc::new(RwLock::new(HashMap::new())),
            assets: Arc::new(RwLock::new(HashMap::new())),
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn device(&self, device: &str) -> Option<&DeviceModel> {
        self.devices.iter().find(|model| model.matches(device))
    }

    /// Every observation received, in arrival order.
    pub async fn observations(&self) -> Vec<StoredObservation> {
        self.observations.read().await.clone()
    }

    pub async fn current(&self, device_uuid: &str, data_item_id: &str) -> Option<Observation> {
        let current = self.current.read().await;
        current
            .get(&(device_uuid.to_owned(), data_item_id.to_owned()))
            .cloned()
    }

    pub async fn asset(&self, asset_id: &str) -> Option<Asset> {
        let assets = self.assets.read().await;
        assets.get(asset_id).map(|(_, asset)| asset.clone())
    }

    pub async fn asset_count(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn device_document(&self, uuid: &str) -> Option<Device> {
        self.documents.read().await.get(uuid).cloned()
    }
}

impl Default for InMemoryAgent {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn receipt_time(timestamp: Timestamp, ignore_timestamp: bool) -> Timestamp {
    if ignore_timestamp {
        Timestamp::now()
    } else {
        timestamp.or(Timestamp::now())
    }
}

fn upcase(observation: Observation) -> Observation {
    match observation {
        Observation::DataItem(mut item) => {
            if let Value::Text(text) = &item.value {
                item.value = Value::Text(text.to_uppercase());
            }
            Observation::DataItem(item)
        }
        other => other,
    }
}

impl DeviceLookup for InMemoryAgent {
    fn data_item(&self, device: &str, key: &str) -> Option<DataItemDescriptor> {
        self.device(device)?.data_item(key).cloned()
    }

    fn device_data_items(&self, device: &str) -> Vec<DataItemDescriptor> {
        self.device(device)
            .map(|model| model.data_items.clone())
            .unwrap_or_default()
    }

    fn device_uuid(&self, device: &str) -> Option<String> {
        self.device(device).map(|model| model.uuid.clone())
    }
}

#[async_trait]
impl AgentSink for InMemoryAgent {
    type Error = InMemoryError;

    // Unit conversion needs native units in the device model; this agent
    // has none, so `convert_units` is a no-op here.
    async fn add_observation(
        &self,
        device_uuid: &str,
        observation: Observation,
        options: ObservationOptions,
    ) -> Result<(), Self::Error> {
        let model = self
            .device(device_uuid)
            .ok_or_else(|| InMemoryError::UnknownDevice(device_uuid.to_owned()))?;

        let data_item_id = model
            .data_item(observation.key())
            .map(|item| item.id.clone())
            .unwrap_or_else(|| observation.key().to_owned());

        let timestamp = receipt_time(observation.timestamp(), options.ignore_timestamp);
        let mut observation = observation.with_timestamp(timestamp);
        if options.ignore_case {
            observation = upcase(observation);
        }

        let uuid = model.uuid.clone();
        self.current
            .write()
            .await
            .insert((uuid.clone(), data_item_id.clone()), observation.clone());
        self.observations.write().await.push(StoredObservation {
            device_uuid: uuid,
            data_item_id,
            observation,
        });
        Ok(())
    }

    async fn add_asset(
        &self,
        device_uuid: &str,
        mut asset: Asset,
        ignore_timestamp: bool,
    ) -> Result<bool, Self::Error> {
        asset.timestamp = receipt_time(asset.timestamp, ignore_timestamp);
        if asset.device_key.is_none() {
            asset.device_key = Some(device_uuid.to_owned());
        }

        let mut assets = self.assets.write().await;
        let _ = assets.insert(asset.asset_id.clone(), (device_uuid.to_owned(), asset));
        Ok(true)
    }

    async fn remove_asset(
        &self,
        _device_uuid: &str,
        asset_id: &str,
        _timestamp: Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut assets = self.assets.write().await;
        Ok(assets.remove(asset_id).is_some())
    }

    async fn remove_all_assets(
        &self,
        device_uuid: &str,
        asset_type: Option<&str>,
        _timestamp: Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut assets = self.assets.write().await;
        let before = assets.len();
        assets.retain(|_, (owner, asset)| {
            let matches_type = asset_type.is_none_or(|kind| asset.asset_type == kind);
            !(owner == device_uuid && matches_type)
        });
        Ok(assets.len() != before)
    }

    async fn add_device(&self, device: Device) -> Result<(), Self::Error> {
        let mut documents = self.documents.write().await;
        let _ = documents.insert(device.uuid.clone(), device);
        Ok(())
    }

    async fn remove_device(&self, uuid: &str, _timestamp: Timestamp) -> Result<bool, Self::Error> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(uuid).is_some())
    }

    async fn remove_all_devices(&self, _timestamp: Timestamp) -> Result<(), Self::Error> {
        self.documents.write().await.clear();
        Ok(())
    }
}
