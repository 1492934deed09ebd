use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Entity, EntityKind, Timestamp};

/// Entry values keyed by entry name. An empty value marks a removed entry.
pub type DataSetEntries = BTreeMap<String, String>;

/// Rows keyed by row name; each row is its own set of cells.
pub type TableEntries = BTreeMap<String, DataSetEntries>;

/// DATA_SET representation: key/value entries carried as one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub device_key: Option<String>,
    pub key: String,
    /// `None` when the data item is unavailable.
    pub entries: Option<DataSetEntries>,
    pub timestamp: Timestamp,
}

impl DataSet {
    pub fn new(key: impl Into<String>, entries: DataSetEntries) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            entries: Some(entries),
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            entries: None,
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
}

/// TABLE representation: rows of key/value cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub device_key: Option<String>,
    pub key: String,
    pub rows: Option<TableEntries>,
    pub timestamp: Timestamp,
}

impl Table {
    pub fn new(key: impl Into<String>, rows: TableEntries) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            rows: Some(rows),
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            rows: None,
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
}

fn hash_entries(hasher: &mut ChangeHasher, entries: &DataSetEntries) {
    for (name, value) in entries {
        hasher.field(name).field(value);
    }
}

impl Entity for DataSet {
    const KIND: EntityKind = EntityKind::DataSet;

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
        hasher.optional(self.device_key.as_deref()).field(&self.key);
        match &self.entries {
            Some(entries) => hash_entries(&mut hasher, entries),
            None => {
                hasher.field(crate::UNAVAILABLE);
            }
        }
        hasher.finish()
    }

    fn to_unavailable(&self) -> Self {
        Self {
            entries: None,
            ..self.clone()
        }
    }
}

impl Entity for Table {
    const KIND: EntityKind = EntityKind::Table;

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
        hasher.optional(self.device_key.as_deref()).field(&self.key);
        match &self.rows {
            Some(rows) => {
                for (row, cells) in rows {
                    hasher.field(row);
                    hash_entries(&mut hasher, cells);
                    hasher.field("}");
                }
            }
            None => {
                hasher.field(crate::UNAVAILABLE);
            }
        }
        hasher.finish()
    }

    fn to_unavailable(&self) -> Self {
        Self {
            rows: None,
            ..self.clone()
        }
    }
}
