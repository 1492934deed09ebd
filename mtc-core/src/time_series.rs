use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Entity, EntityKind, Timestamp};

/// TIME_SERIES sample: a burst of readings at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub device_key: Option<String>,
    pub key: String,
    /// `None` when the data item is unavailable.
    pub samples: Option<Vec<f64>>,
    /// Hertz; zero means "not reported".
    pub sample_rate: f64,
    pub timestamp: Timestamp,
}

impl TimeSeries {
    pub fn new(key: impl Into<String>, samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            samples: Some(samples),
            sample_rate,
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            samples: None,
            sample_rate: 0.0,
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

impl Entity for TimeSeries {
    const KIND: EntityKind = EntityKind::TimeSeries;

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
            .number(self.sample_rate);
        match &self.samples {
            Some(samples) => {
                hasher.field(&samples.len().to_string());
                for sample in samples {
                    hasher.number(*sample);
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
            samples: None,
            sample_rate: 0.0,
            ..self.clone()
        }
    }
}
