use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Timestamp};

/// An MTConnect asset document. The payload is opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub device_key: Option<String>,
    pub asset_id: String,
    pub asset_type: String,
    pub xml: String,
    pub timestamp: Timestamp,
}

impl Asset {
    pub fn new(
        asset_id: impl Into<String>,
        asset_type: impl Into<String>,
        xml: impl Into<String>,
    ) -> Self {
        Self {
            device_key: None,
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            xml: xml.into(),
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn with_device(mut self, device_key: impl Into<String>) -> Self {
        self.device_key = Some(device_key.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn change_id(&self) -> ChangeId {
        let mut hasher = ChangeHasher::new("asset");
        hasher
            .optional(self.device_key.as_deref())
            .field(&self.asset_id)
            .field(&self.asset_type)
            .field(&self.xml);
        hasher.finish()
    }
}
