mod asset;
mod change;
mod condition;
mod data_item;
mod data_set;
mod descriptor;
mod device;
mod message;
mod time;
mod time_series;
mod value;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use asset::Asset;
pub use change::{ChangeHasher, ChangeId};
pub use condition::{Condition, ConditionLevel, ConditionQualifier, FaultState};
pub use data_item::DataItem;
pub use data_set::{DataSet, DataSetEntries, Table, TableEntries};
pub use descriptor::{DataItemCategory, DataItemClass, DataItemDescriptor, Representation};
pub use device::Device;
pub use message::Message;
pub use time::Timestamp;
pub use time_series::TimeSeries;
pub use value::{UNAVAILABLE, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    DataItem,
    Message,
    Condition,
    TimeSeries,
    DataSet,
    Table,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::DataItem => "data-item",
            EntityKind::Message => "message",
            EntityKind::Condition => "condition",
            EntityKind::TimeSeries => "time-series",
            EntityKind::DataSet => "data-set",
            EntityKind::Table => "table",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of every keyed observation kind.
///
/// Entities are immutable values: changing a field means building a new one,
/// so an instance handed to the transport is never touched again.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    fn device_key(&self) -> Option<&str>;

    fn key(&self) -> &str;

    fn timestamp(&self) -> Timestamp;

    fn with_timestamp(&self, timestamp: Timestamp) -> Self;

    fn change_id(&self) -> ChangeId;

    /// The same slot reporting UNAVAILABLE.
    fn to_unavailable(&self) -> Self;

    /// `device:key` when a device is set, otherwise `key`.
    fn store_key(&self) -> String {
        match self.device_key() {
            Some(device) if !device.is_empty() => format!("{device}:{}", self.key()),
            _ => self.key().to_owned(),
        }
    }
}

/// Any observation kind, for mixed queues and decoded streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    DataItem(DataItem),
    Message(Message),
    Condition(Condition),
    TimeSeries(TimeSeries),
    DataSet(DataSet),
    Table(Table),
}

macro_rules! each_observation {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Observation::DataItem($inner) => $body,
            Observation::Message($inner) => $body,
            Observation::Condition($inner) => $body,
            Observation::TimeSeries($inner) => $body,
            Observation::DataSet($inner) => $body,
            Observation::Table($inner) => $body,
        }
    };
}

macro_rules! map_observation {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Observation::DataItem($inner) => Observation::DataItem($body),
            Observation::Message($inner) => Observation::Message($body),
            Observation::Condition($inner) => Observation::Condition($body),
            Observation::TimeSeries($inner) => Observation::TimeSeries($body),
            Observation::DataSet($inner) => Observation::DataSet($body),
            Observation::Table($inner) => Observation::Table($body),
        }
    };
}

impl Observation {
    pub fn kind(&self) -> EntityKind {
        match self {
            Observation::DataItem(_) => EntityKind::DataItem,
            Observation::Message(_) => EntityKind::Message,
            Observation::Condition(_) => EntityKind::Condition,
            Observation::TimeSeries(_) => EntityKind::TimeSeries,
            Observation::DataSet(_) => EntityKind::DataSet,
            Observation::Table(_) => EntityKind::Table,
        }
    }

    pub fn device_key(&self) -> Option<&str> {
        each_observation!(self, inner => inner.device_key())
    }

    pub fn key(&self) -> &str {
        each_observation!(self, inner => inner.key())
    }

    pub fn timestamp(&self) -> Timestamp {
        each_observation!(self, inner => inner.timestamp())
    }

    pub fn with_timestamp(&self, timestamp: Timestamp) -> Self {
        map_observation!(self, inner => inner.with_timestamp(timestamp))
    }

    pub fn change_id(&self) -> ChangeId {
        each_observation!(self, inner => inner.change_id())
    }

    pub fn to_unavailable(&self) -> Self {
        map_observation!(self, inner => inner.to_unavailable())
    }

    pub fn store_key(&self) -> String {
        each_observation!(self, inner => inner.store_key())
    }
}

impl From<DataItem> for Observation {
    fn from(value: DataItem) -> Self {
        Observation::DataItem(value)
    }
}

impl From<Message> for Observation {
    fn from(value: Message) -> Self {
        Observation::Message(value)
    }
}

impl From<Condition> for Observation {
    fn from(value: Condition) -> Self {
        Observation::Condition(value)
    }
}

impl From<TimeSeries> for Observation {
    fn from(value: TimeSeries) -> Self {
        Observation::TimeSeries(value)
    }
}

impl From<DataSet> for Observation {
    fn from(value: DataSet) -> Self {
        Observation::DataSet(value)
    }
}

impl From<Table> for Observation {
    fn from(value: Table) -> Self {
        Observation::Table(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_key_includes_device() {
        let item = DataItem::new("temp", 1.0).with_device("mill");
        assert_eq!(item.store_key(), "mill:temp");
        assert_eq!(DataItem::new("temp", 1.0).store_key(), "temp");
    }

    #[test]
    fn observation_maps_to_unavailable() {
        let obs = Observation::from(TimeSeries::new("pos", vec![1.0, 2.0], 100.0));
        match obs.to_unavailable() {
            Observation::TimeSeries(series) => assert!(series.samples.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
