use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataItemCategory {
    Sample,
    Event,
    Condition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    #[default]
    Value,
    Discrete,
    TimeSeries,
    DataSet,
    Table,
}

/// How a data item's fields are laid out on an SHDR line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataItemClass {
    Value,
    Message,
    Condition,
    TimeSeries,
    DataSet,
    Table,
}

/// Definition of a data item as known to the agent's device model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItemDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub category: DataItemCategory,
    #[serde(default)]
    pub representation: Representation,
    /// MTConnect type, e.g. `TEMPERATURE` or `MESSAGE`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl DataItemDescriptor {
    pub fn new(id: impl Into<String>, category: DataItemCategory, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            category,
            representation: Representation::Value,
            kind: kind.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }

    /// Adapters may address a data item by id or by name.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name.as_deref() == Some(key)
    }

    pub fn class(&self) -> DataItemClass {
        if self.category == DataItemCategory::Condition {
            return DataItemClass::Condition;
        }

        match self.representation {
            Representation::TimeSeries => DataItemClass::TimeSeries,
            Representation::DataSet => DataItemClass::DataSet,
            Representation::Table => DataItemClass::Table,
            Representation::Value | Representation::Discrete => {
                if self.kind.eq_ignore_ascii_case("MESSAGE") {
                    DataItemClass::Message
                } else {
                    DataItemClass::Value
                }
            }
        }
    }
}
