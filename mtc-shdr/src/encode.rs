use mtc_core::{
    Asset, Condition, ConditionLevel, DataItem, DataSet, Device, Message, Observation, Table,
    TimeSeries, Timestamp, UNAVAILABLE,
};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::fields::{escape, format_entries, qualified_key, quote_value};
use crate::message::{
    ASSET_TAG, DEVICE_TAG, MULTILINE_PREFIX, REMOVE_ALL_ASSETS_TAG, REMOVE_ALL_DEVICES_TAG,
    REMOVE_ASSET_TAG, REMOVE_DEVICE_TAG,
};

const TOKEN_LEN: usize = 12;

fn stamp(timestamp: Timestamp, body: &str) -> String {
    if timestamp.is_set() {
        format!("{timestamp}|{body}")
    } else {
        body.to_owned()
    }
}

/// A fresh marker for one multi-line block.
pub fn multiline_marker() -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{MULTILINE_PREFIX}{token}")
}

fn data_item_pair(item: &DataItem) -> String {
    format!(
        "{}|{}",
        qualified_key(item.device_key.as_deref(), &item.key),
        escape(&item.value.to_string())
    )
}

pub fn encode_data_item(item: &DataItem) -> String {
    stamp(item.timestamp, &data_item_pair(item))
}

/// Joins consecutive items sharing a timestamp onto one line.
pub fn encode_data_items(items: &[DataItem]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;

    while start < items.len() {
        let timestamp = items[start].timestamp;
        let end = items[start..]
            .iter()
            .position(|item| item.timestamp != timestamp)
            .map_or(items.len(), |offset| start + offset);

        let body = items[start..end]
            .iter()
            .map(data_item_pair)
            .collect::<Vec<_>>()
            .join("|");
        lines.push(stamp(timestamp, &body));
        start = end;
    }

    lines
}

pub fn encode_message(message: &Message) -> String {
    let key = qualified_key(message.device_key.as_deref(), &message.key);
    let native_code = message.native_code.as_deref().unwrap_or_default();
    let body = format!(
        "{key}|{}|{}",
        escape(native_code),
        escape(&message.value.to_string())
    );
    stamp(message.timestamp, &body)
}

/// One line per fault state; an empty condition is written as NORMAL.
pub fn encode_condition(condition: &Condition) -> Vec<String> {
    let key = qualified_key(condition.device_key.as_deref(), &condition.key);

    if condition.fault_states.is_empty() {
        return vec![stamp(condition.timestamp, &format!("{key}|NORMAL||||"))];
    }

    condition
        .fault_states
        .iter()
        .map(|state| {
            let body = if state.level == ConditionLevel::Unavailable {
                format!("{key}|{}||||", state.level)
            } else {
                format!(
                    "{key}|{}|{}|{}|{}|{}",
                    state.level,
                    escape(state.native_code.as_deref().unwrap_or_default()),
                    escape(state.native_severity.as_deref().unwrap_or_default()),
                    state.qualifier.as_str(),
                    escape(state.text.as_deref().unwrap_or_default()),
                )
            };
            stamp(condition.timestamp, &body)
        })
        .collect()
}

pub fn encode_time_series(series: &TimeSeries) -> String {
    let key = qualified_key(series.device_key.as_deref(), &series.key);
    let body = match &series.samples {
        Some(samples) => {
            let rate = if series.sample_rate > 0.0 {
                series.sample_rate.to_string()
            } else {
                String::new()
            };
            let text = samples
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            format!("{key}|{}|{rate}|{text}", samples.len())
        }
        None => format!("{key}|{UNAVAILABLE}"),
    };
    stamp(series.timestamp, &body)
}

pub fn encode_data_set(data_set: &DataSet) -> String {
    let key = qualified_key(data_set.device_key.as_deref(), &data_set.key);
    let body = match &data_set.entries {
        Some(entries) => format!("{key}|{}", escape(&format_entries(entries))),
        None => format!("{key}|{UNAVAILABLE}"),
    };
    stamp(data_set.timestamp, &body)
}

pub fn encode_table(table: &Table) -> String {
    let key = qualified_key(table.device_key.as_deref(), &table.key);
    let body = match &table.rows {
        Some(rows) => {
            let rows = rows
                .iter()
                .map(|(row, cells)| format!("{row}={}", quote_value(&format_entries(cells))))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{key}|{}", escape(&rows))
        }
        None => format!("{key}|{UNAVAILABLE}"),
    };
    stamp(table.timestamp, &body)
}

/// Encodes a batch in order, joining runs of data items that share a
/// timestamp onto a single line.
pub fn encode_observations(observations: &[Observation]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut run: Vec<DataItem> = Vec::new();

    for observation in observations {
        if let Observation::DataItem(item) = observation {
            run.push(item.clone());
            continue;
        }

        lines.extend(encode_data_items(&run));
        run.clear();

        match observation {
            Observation::DataItem(_) => {}
            Observation::Message(message) => lines.push(encode_message(message)),
            Observation::Condition(condition) => lines.extend(encode_condition(condition)),
            Observation::TimeSeries(series) => lines.push(encode_time_series(series)),
            Observation::DataSet(data_set) => lines.push(encode_data_set(data_set)),
            Observation::Table(table) => lines.push(encode_table(table)),
        }
    }
    lines.extend(encode_data_items(&run));

    lines
}

fn framed(header: String, timestamp: Timestamp, payload: &str, multiline: bool) -> Vec<String> {
    if !multiline {
        return vec![stamp(timestamp, &format!("{header}|{payload}"))];
    }

    let marker = multiline_marker();
    let mut lines = Vec::with_capacity(3);
    lines.push(stamp(timestamp, &format!("{header}|{marker}")));
    lines.extend(payload.split('\n').map(str::to_owned));
    lines.push(marker);
    lines
}

/// Single-line form flattens line breaks in the payload; the multi-line form
/// carries it verbatim between a header and a matching marker line.
pub fn encode_asset(asset: &Asset, multiline: bool) -> Vec<String> {
    let header = format!("{ASSET_TAG}|{}|{}", asset.asset_id, asset.asset_type);
    if multiline {
        framed(header, asset.timestamp, &asset.xml, true)
    } else {
        framed(header, asset.timestamp, &flatten(&asset.xml), false)
    }
}

pub fn encode_device(device: &Device, multiline: bool) -> Vec<String> {
    let header = format!("{DEVICE_TAG}|{}", device.uuid);
    if multiline {
        framed(header, device.timestamp, &device.payload, true)
    } else {
        framed(header, device.timestamp, &flatten(&device.payload), false)
    }
}

fn flatten(payload: &str) -> String {
    payload.replace(['\r', '\n'], "")
}

pub fn encode_remove_asset(asset_id: &str, timestamp: Timestamp) -> String {
    stamp(timestamp, &format!("{REMOVE_ASSET_TAG}|{asset_id}"))
}

pub fn encode_remove_all_assets(asset_type: Option<&str>, timestamp: Timestamp) -> String {
    stamp(
        timestamp,
        &format!("{REMOVE_ALL_ASSETS_TAG}|{}", asset_type.unwrap_or_default()),
    )
}

pub fn encode_remove_device(uuid: &str, timestamp: Timestamp) -> String {
    stamp(timestamp, &format!("{REMOVE_DEVICE_TAG}|{uuid}"))
}

pub fn encode_remove_all_devices(timestamp: Timestamp) -> String {
    stamp(timestamp, REMOVE_ALL_DEVICES_TAG)
}
