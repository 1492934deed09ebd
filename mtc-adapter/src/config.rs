use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::DEFAULT_BUFFER_LIMIT;

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
    pub server: ServerConfig,
    pub adapter: AdapterConfig,
    pub source: SourceConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub heartbeat_ms: u64,
    /// Per-client write timeout.
    pub timeout_ms: u64,
    pub max_missed_heartbeats: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], mtc_shdr::DEFAULT_PORT)),
            heartbeat_ms: mtc_shdr::DEFAULT_HEARTBEAT.as_millis() as u64,
            timeout_ms: mtc_shdr::DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            max_missed_heartbeats: 2,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which flush the interval loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    /// Latest value per data item, deduplicated.
    #[default]
    Current,
    /// Every distinct observation in arrival order.
    Buffer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Device prefix applied to observations that do not name one.
    pub device_key: Option<String>,
    pub interval_ms: u64,
    pub mode: AdapterMode,
    pub filter_duplicates: bool,
    pub output_timestamps: bool,
    pub buffer_limit: usize,
    pub multiline_assets: bool,
    pub multiline_devices: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            device_key: None,
            interval_ms: 100,
            mode: AdapterMode::Current,
            filter_duplicates: true,
            output_timestamps: true,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            multiline_assets: true,
            multiline_devices: true,
        }
    }
}

impl AdapterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Simulated machine feeding the adapter binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub sample_interval_ms: u64,
    /// Chance per tick, in percent, of raising a warning on `system`.
    pub warning_percent: u32,
    pub send_tool_asset: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 1000,
            warning_percent: 5,
            send_tool_asset: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let config = Config::default();
        assert_eq!(config.server.addr.port(), 7878);
        assert_eq!(config.server.heartbeat(), Duration::from_secs(10));
        assert_eq!(config.server.timeout(), Duration::from_secs(5));
        assert_eq!(config.adapter.interval(), Duration::from_millis(100));
        assert_eq!(config.adapter.buffer_limit, 50_000);
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<(), ConfigError> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
[server]
addr = "127.0.0.1:7900"

[adapter]
mode = "buffer"
device_key = "mill"
"#
        )?;

        let config = Config::load(file.path())?;
        assert_eq!(config.server.addr.port(), 7900);
        assert_eq!(config.server.max_missed_heartbeats, 2);
        assert_eq!(config.adapter.mode, AdapterMode::Buffer);
        assert_eq!(config.adapter.device_key.as_deref(), Some("mill"));
        assert!(config.adapter.filter_duplicates);
        Ok(())
    }

    #[test]
    fn bad_file_is_a_parse_error() -> Result<(), std::io::Error> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[server]\naddr = 12")?;
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
        Ok(())
    }
}
