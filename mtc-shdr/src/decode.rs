use mtc_core::{
    Condition, ConditionLevel, ConditionQualifier, DataItem, DataItemClass, DataSet, FaultState,
    Message, Observation, Table, TableEntries, TimeSeries, Timestamp, UNAVAILABLE, Value,
};

use crate::ParseError;
use crate::fields::{parse_entries, split_key};

fn optional(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_owned())
}

fn parse_number(field: &str) -> Result<f64, ParseError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(field.to_owned()))
}

/// Cursor over the fields of one line.
struct Fields<'a> {
    fields: &'a [String],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let field = self.fields.get(self.pos)?;
        self.pos += 1;
        Some(field.as_str())
    }

    fn require(&mut self, name: &'static str) -> Result<&'a str, ParseError> {
        self.next().ok_or(ParseError::MissingField(name))
    }

    fn optional(&mut self) -> &'a str {
        self.next().unwrap_or_default()
    }
}

/// Turns the fields of an observation line into typed observations.
///
/// `resolve` maps `(device, key)` to the data item's wire layout; a miss
/// yields [`ParseError::UnknownDataItem`] and skips one value field. Each
/// entry in the result stands alone: a failure does not stop the rest of
/// the line from decoding.
pub fn decode_observations<F>(
    timestamp: Timestamp,
    fields: &[String],
    mut resolve: F,
) -> Vec<Result<Observation, ParseError>>
where
    F: FnMut(Option<&str>, &str) -> Option<DataItemClass>,
{
    let mut results = Vec::new();
    let mut cursor = Fields { fields, pos: 0 };

    while let Some(raw_key) = cursor.next() {
        if raw_key.is_empty() {
            continue;
        }

        let (device, key) = split_key(raw_key);
        let Some(class) = resolve(device, key) else {
            cursor.next();
            results.push(Err(ParseError::UnknownDataItem {
                device: device.map(str::to_owned),
                key: key.to_owned(),
            }));
            continue;
        };

        let device = device.map(str::to_owned);
        let key = key.to_owned();
        let decoded = match class {
            DataItemClass::Value => decode_value(&mut cursor, device, key, timestamp),
            DataItemClass::Message => decode_message(&mut cursor, device, key, timestamp),
            DataItemClass::Condition => decode_condition(&mut cursor, device, key, timestamp),
            DataItemClass::TimeSeries => decode_time_series(&mut cursor, device, key, timestamp),
            DataItemClass::DataSet => decode_data_set(&mut cursor, device, key, timestamp),
            DataItemClass::Table => decode_table(&mut cursor, device, key, timestamp),
        };
        results.push(decoded);
    }

    results
}

fn decode_value(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let value = cursor.require("value")?;
    Ok(DataItem {
        device_key,
        key,
        value: Value::parse(value),
        timestamp,
    }
    .into())
}

fn decode_message(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let native_code = cursor.require("native code")?;
    // `key|UNAVAILABLE` is accepted as shorthand for `key||UNAVAILABLE`.
    let (native_code, text) = if native_code.eq_ignore_ascii_case(UNAVAILABLE) {
        ("", native_code)
    } else {
        (native_code, cursor.require("message text")?)
    };

    let value = if text.eq_ignore_ascii_case(UNAVAILABLE) {
        Value::Unavailable
    } else {
        Value::Text(text.to_owned())
    };

    Ok(Message {
        device_key,
        key,
        value,
        native_code: optional(native_code),
        timestamp,
    }
    .into())
}

fn decode_condition(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let level = cursor.require("condition level")?;
    let native_code = cursor.optional();
    let native_severity = cursor.optional();
    let qualifier = cursor.optional();
    let text = cursor.optional();

    let level: ConditionLevel = level.parse()?;
    let state = FaultState {
        level,
        native_code: optional(native_code),
        native_severity: optional(native_severity),
        qualifier: qualifier.parse::<ConditionQualifier>()?,
        text: optional(text),
    };

    Ok(Condition {
        device_key,
        key,
        fault_states: vec![state],
        timestamp,
    }
    .into())
}

fn decode_time_series(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let count = cursor.require("sample count")?;
    if count.eq_ignore_ascii_case(UNAVAILABLE) {
        return Ok(TimeSeries {
            device_key,
            key,
            samples: None,
            sample_rate: 0.0,
            timestamp,
        }
        .into());
    }

    let rate = cursor.require("sample rate")?;
    let samples = cursor.require("samples")?;

    let declared: usize = count
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidNumber(count.to_owned()))?;
    let sample_rate = if rate.trim().is_empty() {
        0.0
    } else {
        parse_number(rate)?
    };
    let samples = samples
        .split_whitespace()
        .map(parse_number)
        .collect::<Result<Vec<_>, _>>()?;

    if samples.len() != declared {
        return Err(ParseError::SampleCount {
            declared,
            actual: samples.len(),
        });
    }

    Ok(TimeSeries {
        device_key,
        key,
        samples: Some(samples),
        sample_rate,
        timestamp,
    }
    .into())
}

fn decode_data_set(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let text = cursor.require("data set entries")?;
    let entries = if text.trim().eq_ignore_ascii_case(UNAVAILABLE) {
        None
    } else {
        Some(parse_entries(text)?)
    };

    Ok(DataSet {
        device_key,
        key,
        entries,
        timestamp,
    }
    .into())
}

fn decode_table(
    cursor: &mut Fields<'_>,
    device_key: Option<String>,
    key: String,
    timestamp: Timestamp,
) -> Result<Observation, ParseError> {
    let text = cursor.require("table entries")?;
    let rows = if text.trim().eq_ignore_ascii_case(UNAVAILABLE) {
        None
    } else {
        let mut rows = TableEntries::new();
        for (row, cells) in parse_entries(text)? {
            rows.insert(row, parse_entries(&cells)?);
        }
        Some(rows)
    };

    Ok(Table {
        device_key,
        key,
        rows,
        timestamp,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::split_fields;

    fn resolve(_device: Option<&str>, key: &str) -> Option<DataItemClass> {
        match key {
            "temp" | "mode" => Some(DataItemClass::Value),
            "msg" => Some(DataItemClass::Message),
            "system" => Some(DataItemClass::Condition),
            "pos" => Some(DataItemClass::TimeSeries),
            "vars" => Some(DataItemClass::DataSet),
            "tools" => Some(DataItemClass::Table),
            _ => None,
        }
    }

    fn decode(line: &str) -> Vec<Result<Observation, ParseError>> {
        decode_observations(Timestamp::UNSET, &split_fields(line), resolve)
    }

    #[test]
    fn several_items_on_one_line() {
        let decoded = decode("temp|72.5|mode|AUTOMATIC");
        assert_eq!(decoded.len(), 2);
        assert_eq!(
            decoded[0],
            Ok(Observation::DataItem(DataItem::new("temp", 72.5)))
        );
        assert_eq!(
            decoded[1],
            Ok(Observation::DataItem(DataItem::new("mode", "AUTOMATIC")))
        );
    }

    #[test]
    fn unknown_key_does_not_stop_the_line() {
        let decoded = decode("bogus|1|temp|3");
        assert!(matches!(
            decoded[0],
            Err(ParseError::UnknownDataItem { ref key, .. }) if key == "bogus"
        ));
        assert_eq!(decoded[1], Ok(Observation::DataItem(DataItem::new("temp", 3.0))));
    }

    #[test]
    fn bad_condition_level_is_reported() {
        let decoded = decode("system|BROKEN||||");
        assert!(matches!(decoded[0], Err(ParseError::UnknownVariant(_))));
    }

    #[test]
    fn time_series_count_must_match() {
        let decoded = decode("pos|3|100|1 2");
        assert_eq!(
            decoded[0],
            Err(ParseError::SampleCount {
                declared: 3,
                actual: 2
            })
        );

        let decoded = decode("pos|2|100|1 x");
        assert_eq!(decoded[0], Err(ParseError::InvalidNumber("x".into())));
    }

    #[test]
    fn message_shorthand_unavailable() {
        let decoded = decode("msg|UNAVAILABLE");
        assert_eq!(
            decoded[0],
            Ok(Observation::Message(Message::unavailable("msg")))
        );
    }

    #[test]
    fn device_prefix_is_kept() {
        let decoded = decode("mill:temp|5");
        assert_eq!(
            decoded[0],
            Ok(Observation::DataItem(DataItem::new("temp", 5.0).with_device("mill")))
        );
    }

    #[test]
    fn table_rows_parse() {
        let decoded = decode("tools|T1={len=10 dia=2} T2=");
        let Ok(Observation::Table(table)) = &decoded[0] else {
            panic!("expected table, got {decoded:?}");
        };
        let rows = table.rows.as_ref().unwrap();
        assert_eq!(rows["T1"]["len"], "10");
        assert!(rows["T2"].is_empty());
    }
}
