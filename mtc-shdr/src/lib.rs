//! SHDR: the pipe-delimited line protocol spoken between an MTConnect
//! adapter and an agent.

mod decode;
mod encode;
mod error;
mod fields;
mod frame;
mod message;

use std::time::Duration;

pub use decode::decode_observations;
pub use encode::{
    encode_asset, encode_condition, encode_data_item, encode_data_items, encode_data_set,
    encode_device, encode_message, encode_observations, encode_remove_all_assets,
    encode_remove_all_devices, encode_remove_asset, encode_remove_device, encode_table,
    encode_time_series, multiline_marker,
};
pub use error::{FramingError, ParseError};
pub use fields::{escape, format_entries, parse_entries, qualified_key, split_fields, split_key};
pub use frame::{MAX_LINE_BYTES, MultilineAssembler, RecordResult, ShdrReader, ShdrRecord, write_lines};
pub use message::{
    ASSET_TAG, Body, Command, DEVICE_TAG, MULTILINE_PREFIX, PING_LINE, REMOVE_ALL_ASSETS_TAG,
    REMOVE_ALL_DEVICES_TAG, REMOVE_ASSET_TAG, REMOVE_DEVICE_TAG, ShdrLine, command_line,
    parse_line, pong_line,
};

pub const DEFAULT_PORT: u16 = 7878;
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Version announced by `* shdrVersion:` on connect.
pub const SHDR_VERSION: u32 = 2;
