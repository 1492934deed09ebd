use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Timestamp};

/// A serialized device model pushed by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub payload: String,
    pub timestamp: Timestamp,
}

impl Device {
    pub fn new(uuid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            payload: payload.into(),
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Identity is the uuid plus a hash of the payload.
    pub fn change_id(&self) -> ChangeId {
        let mut hasher = ChangeHasher::new("device");
        hasher.field(&self.uuid).field(&self.payload);
        hasher.finish()
    }
}
