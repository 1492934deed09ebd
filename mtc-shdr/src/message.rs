use std::time::Duration;

use mtc_core::Timestamp;

use crate::ParseError;
use crate::fields::split_fields;

pub const ASSET_TAG: &str = "@ASSET@";
pub const DEVICE_TAG: &str = "@DEVICE@";
pub const REMOVE_ASSET_TAG: &str = "@REMOVE_ASSET@";
pub const REMOVE_ALL_ASSETS_TAG: &str = "@REMOVE_ALL_ASSETS@";
pub const REMOVE_DEVICE_TAG: &str = "@REMOVE_DEVICE@";
pub const REMOVE_ALL_DEVICES_TAG: &str = "@REMOVE_ALL_DEVICES@";
pub const MULTILINE_PREFIX: &str = "--multiline--";

pub const PING_LINE: &str = "* PING";

/// `* PONG <heartbeat-ms>`.
pub fn pong_line(heartbeat: Duration) -> String {
    format!("* PONG {}", heartbeat.as_millis())
}

/// `* <name>: <value>`.
pub fn command_line(name: &str, value: &str) -> String {
    format!("* {name}: {value}")
}

/// Out-of-band protocol lines, prefixed with `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Pong { heartbeat: Duration },
    Set { name: String, value: String },
}

/// Payload of an asset or device header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Inline(String),
    /// Body follows on subsequent lines until a line equal to the marker.
    Multiline { marker: String },
}

/// One decoded SHDR line, before data-item lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShdrLine {
    Command(Command),
    Observations {
        timestamp: Timestamp,
        fields: Vec<String>,
    },
    Asset {
        timestamp: Timestamp,
        asset_id: String,
        asset_type: String,
        body: Body,
    },
    Device {
        timestamp: Timestamp,
        uuid: String,
        body: Body,
    },
    RemoveAsset {
        timestamp: Timestamp,
        asset_id: String,
    },
    RemoveAllAssets {
        timestamp: Timestamp,
        asset_type: Option<String>,
    },
    RemoveDevice {
        timestamp: Timestamp,
        uuid: String,
    },
    RemoveAllDevices {
        timestamp: Timestamp,
    },
}

/// Decodes a single line (without its terminator).
///
/// The first field is consumed as a timestamp when it parses as one;
/// otherwise the whole line is treated as unstamped.
pub fn parse_line(line: &str) -> Result<ShdrLine, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(command) = line.strip_prefix('*') {
        return parse_command(command.trim()).map(ShdrLine::Command);
    }

    let (timestamp, rest) = match line.split_once('|') {
        Some((first, rest)) => match Timestamp::parse(first) {
            Some(timestamp) => (timestamp, rest),
            None => (Timestamp::UNSET, line),
        },
        None => (Timestamp::UNSET, line),
    };

    if rest.starts_with('@') {
        return parse_tagged(timestamp, rest);
    }

    Ok(ShdrLine::Observations {
        timestamp,
        fields: split_fields(rest),
    })
}

fn parse_command(text: &str) -> Result<Command, ParseError> {
    if text.eq_ignore_ascii_case("PING") {
        return Ok(Command::Ping);
    }

    if let Some(rest) = text.strip_prefix("PONG") {
        let millis = rest.trim();
        let millis: u64 = millis
            .parse()
            .map_err(|_| ParseError::InvalidNumber(millis.to_owned()))?;
        return Ok(Command::Pong {
            heartbeat: Duration::from_millis(millis),
        });
    }

    match text.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok(Command::Set {
            name: name.trim().to_owned(),
            value: value.trim().to_owned(),
        }),
        _ => Err(ParseError::UnknownCommand(text.to_owned())),
    }
}

fn body(raw: &str) -> Body {
    if raw.starts_with(MULTILINE_PREFIX) {
        Body::Multiline {
            marker: raw.trim_end().to_owned(),
        }
    } else {
        Body::Inline(raw.to_owned())
    }
}

fn non_empty(field: Option<&str>, name: &'static str) -> Result<String, ParseError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(ParseError::MissingField(name)),
    }
}

fn parse_tagged(timestamp: Timestamp, rest: &str) -> Result<ShdrLine, ParseError> {
    let (tag, args) = rest.split_once('|').unwrap_or((rest, ""));

    match tag {
        ASSET_TAG => {
            let mut parts = args.splitn(3, '|');
            let asset_id = non_empty(parts.next(), "asset id")?;
            let asset_type = non_empty(parts.next(), "asset type")?;
            let raw = parts.next().ok_or(ParseError::MissingField("asset body"))?;
            Ok(ShdrLine::Asset {
                timestamp,
                asset_id,
                asset_type,
                body: body(raw),
            })
        }
        DEVICE_TAG => {
            let mut parts = args.splitn(2, '|');
            let uuid = non_empty(parts.next(), "device uuid")?;
            let raw = parts.next().ok_or(ParseError::MissingField("device body"))?;
            Ok(ShdrLine::Device {
                timestamp,
                uuid,
                body: body(raw),
            })
        }
        REMOVE_ASSET_TAG => Ok(ShdrLine::RemoveAsset {
            timestamp,
            asset_id: non_empty(args.split('|').next(), "asset id")?,
        }),
        REMOVE_ALL_ASSETS_TAG => {
            let asset_type = args.split('|').next().unwrap_or_default().trim();
            Ok(ShdrLine::RemoveAllAssets {
                timestamp,
                asset_type: (!asset_type.is_empty()).then(|| asset_type.to_owned()),
            })
        }
        REMOVE_DEVICE_TAG => Ok(ShdrLine::RemoveDevice {
            timestamp,
            uuid: non_empty(args.split('|').next(), "device uuid")?,
        }),
        REMOVE_ALL_DEVICES_TAG => Ok(ShdrLine::RemoveAllDevices { timestamp }),
        _ => Err(ParseError::UnknownCommand(tag.to_owned())),
    }
}
