use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ChangeHasher, ChangeId, Entity, EntityKind, Timestamp, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionLevel {
    Unavailable,
    Normal,
    Warning,
    Fault,
}

impl ConditionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionLevel::Unavailable => "UNAVAILABLE",
            ConditionLevel::Normal => "NORMAL",
            ConditionLevel::Warning => "WARNING",
            ConditionLevel::Fault => "FAULT",
        }
    }

    /// NORMAL and UNAVAILABLE clear every other active state for a key.
    pub fn is_clearing(self) -> bool {
        matches!(self, ConditionLevel::Unavailable | ConditionLevel::Normal)
    }
}

impl fmt::Display for ConditionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNAVAILABLE" => Ok(ConditionLevel::Unavailable),
            "NORMAL" => Ok(ConditionLevel::Normal),
            "WARNING" => Ok(ConditionLevel::Warning),
            "FAULT" => Ok(ConditionLevel::Fault),
            _ => Err(UnknownVariant::new("condition level", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionQualifier {
    #[default]
    NotSpecified,
    High,
    Low,
}

impl ConditionQualifier {
    /// Wire form; `NotSpecified` is written as an empty field.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionQualifier::NotSpecified => "",
            ConditionQualifier::High => "HIGH",
            ConditionQualifier::Low => "LOW",
        }
    }
}

impl FromStr for ConditionQualifier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NOT_SPECIFIED" => Ok(ConditionQualifier::NotSpecified),
            "HIGH" => Ok(ConditionQualifier::High),
            "LOW" => Ok(ConditionQualifier::Low),
            _ => Err(UnknownVariant::new("condition qualifier", s)),
        }
    }
}

/// One active state of a condition data item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultState {
    pub level: ConditionLevel,
    pub native_code: Option<String>,
    pub native_severity: Option<String>,
    pub qualifier: ConditionQualifier,
    pub text: Option<String>,
}

impl FaultState {
    pub fn new(level: ConditionLevel) -> Self {
        Self {
            level,
            native_code: None,
            native_severity: None,
            qualifier: ConditionQualifier::NotSpecified,
            text: None,
        }
    }

    pub fn unavailable() -> Self {
        Self::new(ConditionLevel::Unavailable)
    }

    pub fn normal() -> Self {
        Self::new(ConditionLevel::Normal)
    }

    pub fn warning(native_code: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(ConditionLevel::Warning)
            .with_native_code(native_code)
            .with_text(text)
    }

    pub fn fault(native_code: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(ConditionLevel::Fault)
            .with_native_code(native_code)
            .with_text(text)
    }

    pub fn with_native_code(mut self, native_code: impl Into<String>) -> Self {
        self.native_code = Some(native_code.into());
        self
    }

    pub fn with_native_severity(mut self, severity: impl Into<String>) -> Self {
        self.native_severity = Some(severity.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: ConditionQualifier) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn change_id(&self) -> ChangeId {
        let mut hasher = ChangeHasher::new("fault-state");
        hasher
            .field(self.level.as_str())
            .optional(self.native_code.as_deref())
            .optional(self.native_severity.as_deref())
            .field(self.qualifier.as_str())
            .optional(self.text.as_deref());
        hasher.finish()
    }
}

/// Condition data item: an ordered set of simultaneously active fault states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub device_key: Option<String>,
    pub key: String,
    pub fault_states: Vec<FaultState>,
    pub timestamp: Timestamp,
}

impl Condition {
    pub fn new(key: impl Into<String>, state: FaultState) -> Self {
        Self {
            device_key: None,
            key: key.into(),
            fault_states: vec![state],
            timestamp: Timestamp::UNSET,
        }
    }

    pub fn unavailable(key: impl Into<String>) -> Self {
        Self::new(key, FaultState::unavailable())
    }

    pub fn normal(key: impl Into<String>) -> Self {
        Self::new(key, FaultState::normal())
    }

    pub fn with_device(mut self, device_key: impl Into<String>) -> Self {
        self.device_key = Some(device_key.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Merges `state` into this condition.
    ///
    /// A clearing level replaces every state. WARNING/FAULT replace any
    /// clearing state, replace an existing instance with the same native
    /// code, and otherwise accumulate.
    pub fn with_fault_state(mut self, state: FaultState) -> Self {
        if state.level.is_clearing() {
            self.fault_states = vec![state];
            return self;
        }

        self.fault_states.retain(|existing| {
            !existing.level.is_clearing()
                && (existing.native_code.is_none() || existing.native_code != state.native_code)
        });
        self.fault_states.push(state);
        self
    }

    pub fn is_unavailable(&self) -> bool {
        self.fault_states
            .iter()
            .all(|s| s.level == ConditionLevel::Unavailable)
    }
}

impl Entity for Condition {
    const KIND: EntityKind = EntityKind::Condition;

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
            .field(&ChangeId::combine(self.fault_states.iter().map(FaultState::change_id)).to_string());
        hasher.finish()
    }

    fn to_unavailable(&self) -> Self {
        Self {
            fault_states: vec![FaultState::unavailable()],
            ..self.clone()
        }
    }
}
