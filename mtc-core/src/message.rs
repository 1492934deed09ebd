use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Entity, EntityKind, Timestamp, Value};

/// MESSAGE event: free text with an optional native code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub device_key: Option<String>,
    pub key: String,
    pub value: Value,
    pub native_code: Option<String>,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            value: Value::Text(text.into()),
            native_code: None,
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self {
            value: Value::Unavailable,
            ..Self::new(key, "")
        }
    }

    pub fn with_native_code(mut self, native_code: impl Into<String>) -> Self {
        self.native_code = Some(native_code.into());
        self
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

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

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
            .optional(self.native_code.as_deref())
            .field(&self.value.to_string());
        hasher.finish()
    }

    fn to_unavailable(&self) -> Self {
        Self {
            value: Value::Unavailable,
            native_code: None,
            ..self.clone()
        }
    }
}
