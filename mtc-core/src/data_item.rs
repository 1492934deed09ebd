use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Entity, EntityKind, Timestamp, Value};

/// A single value observation for a data item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub device_key: Option<String>,
    pub key: String,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl DataItem {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            value: value.into(),
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self::new(key, Value::Unavailable)
    }

    pub fn with_device(mut self, device_key: impl Into<String>) -> Self {
        self.device_key = Some(device_key.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Entity for DataItem {
    const KIND: EntityKind = EntityKind::DataItem;

    fn device_key(&self) -> Option<&str> {
        self.device_key.as_deref()
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn with_timestamp(&self, timestamp: Timestamp) -> Self {
        self.clone().at(timestamp)
    }

    fn change_id(&self) -> ChangeId {
        let mut hasher = ChangeHasher::new(Self::KIND.as_str());
        hasher
            .optional(self.device_key.as_deref())
            .field(&self.key)
            .field(&self.value.to_string());
        hasher.finish()
    }

    fn to_unavailable(&self) -> Self {
        Self {
            value: Value::Unavailable,
            ..self.clone()
        }
    }
}
