use std::path::Path;
use std::time::Duration;

use mtc_core::DataItemDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub adapters: Vec<AdapterConfig>,
    pub devices: Vec<DeviceModel>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// One upstream adapter the agent connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub host: String,
    pub port: u16,
    /// Name or uuid of the device observations are attributed to.
    pub device: String,
    /// PING interval used until the adapter announces its own in a PONG.
    pub heartbeat_ms: u64,
    /// Read timeout for adapters that never answer PING.
    pub legacy_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub ignore_timestamps: bool,
    pub convert_units: bool,
    pub ignore_case: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: mtc_shdr::DEFAULT_PORT,
            device: String::new(),
            heartbeat_ms: mtc_shdr::DEFAULT_HEARTBEAT.as_millis() as u64,
            legacy_timeout_ms: 600_000,
            reconnect_interval_ms: 10_000,
            ignore_timestamps: false,
            convert_units: true,
            ignore_case: false,
        }
    }
}

impl AdapterConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn legacy_timeout(&self) -> Duration {
        Duration::from_millis(self.legacy_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// A device and the data items adapters may report for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub data_items: Vec<DataItemDescriptor>,
}

impl DeviceModel {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            data_items: Vec::new(),
        }
    }

    pub fn with_data_item(mut self, item: DataItemDescriptor) -> Self {
        self.data_items.push(item);
        self
    }

    /// Devices are addressed by uuid or name.
    pub fn matches(&self, device: &str) -> bool {
        self.uuid == device || self.name == device
    }

    pub fn data_item(&self, key: &str) -> Option<&DataItemDescriptor> {
        self.data_items.iter().find(|item| item.matches(key))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use mtc_core::{DataItemCategory, DataItemClass};
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn adapter_defaults() {
        let adapter = AdapterConfig::default();
        assert_eq!(adapter.port, 7878);
        assert_eq!(adapter.heartbeat(), Duration::from_secs(10));
        assert_eq!(adapter.legacy_timeout(), Duration::from_secs(600));
        assert_eq!(adapter.reconnect_interval(), Duration::from_secs(10));
    }

    #[test]
    fn loads_adapters_and_devices() -> Result<(), ConfigError> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
[[adapters]]
host = "10.0.0.5"
device = "mill"
ignore_timestamps = true

[[devices]]
uuid = "mill-001"
name = "mill"

[[devices.data_items]]
id = "m1_temp"
name = "temp"
category = "sample"
type = "TEMPERATURE"

[[devices.data_items]]
id = "m1_system"
category = "condition"
type = "SYSTEM"
"#
        )?;

        let config = Config::load(file.path())?;
        assert_eq!(config.adapters.len(), 1);
        assert_eq!(config.adapters[0].host, "10.0.0.5");
        assert_eq!(config.adapters[0].port, 7878);
        assert!(config.adapters[0].ignore_timestamps);

        let device = &config.devices[0];
        assert!(device.matches("mill") && device.matches("mill-001"));
        let temp = device.data_item("temp").map(|item| item.id.as_str());
        assert_eq!(temp, Some("m1_temp"));
        assert_eq!(
            device.data_item("m1_system").map(|item| item.category),
            Some(DataItemCategory::Condition)
        );
        assert_eq!(
            device.data_item("m1_system").map(|item| item.class()),
            Some(DataItemClass::Condition)
        );
        Ok(())
    }

    #[test]
    fn bad_file_is_a_parse_error() -> Result<(), std::io::Error> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[[adapters]]\nport = \"seven\"")?;
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
        Ok(())
    }
}
