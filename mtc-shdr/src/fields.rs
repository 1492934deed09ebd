//! Field-level helpers: pipe splitting with `\|` and `\\` escapes,
//! device-qualified keys, and the `k=v` entry lists used by data sets and
//! tables.

use mtc_core::DataSetEntries;

use crate::ParseError;

pub const DELIMITER: char = '|';

const ESCAPE: char = '\\';

/// Escapes backslashes and pipes so the text survives as a single field.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, ESCAPE | DELIMITER) {
            escaped.push(ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Splits on unescaped `|` and unescapes `\|` and `\\` inside each field.
/// Any other backslash is kept as written.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.peek().copied() {
                Some(next @ (ESCAPE | DELIMITER)) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(c),
            },
            DELIMITER => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}

/// `device:key` when a device is given.
pub fn qualified_key(device_key: Option<&str>, key: &str) -> String {
    match device_key {
        Some(device) if !device.is_empty() => format!("{device}:{key}"),
        _ => key.to_owned(),
    }
}

/// Inverse of [`qualified_key`]: splits on the first `:`.
pub fn split_key(field: &str) -> (Option<&str>, &str) {
    match field.split_once(':') {
        Some((device, key)) if !device.is_empty() && !key.is_empty() => (Some(device), key),
        _ => (None, field),
    }
}

fn needs_quoting(value: &str) -> bool {
    value.chars().any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '"' | '\''))
}

fn balanced_braces(value: &str) -> bool {
    let mut depth = 0usize;
    for c in value.chars() {
        match c {
            '{' => depth += 1,
            '}' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0
}

/// Braces when they nest cleanly, otherwise whichever quote the value lacks.
/// A value with stray braces and both quote characters has no lossless form;
/// it is written braced.
pub(crate) fn quote_value(value: &str) -> String {
    if !needs_quoting(value) {
        value.to_owned()
    } else if balanced_braces(value) {
        format!("{{{value}}}")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else if !value.contains('\'') {
        format!("'{value}'")
    } else {
        format!("{{{value}}}")
    }
}

/// Writes entries as `k1=v1 k2={v 2}`.
pub fn format_entries(entries: &DataSetEntries) -> String {
    entries
        .iter()
        .map(|(name, value)| format!("{name}={}", quote_value(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads `k1=v1 k2="v 2" k3={v 3} k4=`; values may be quoted with `"`, `'`
/// or (nesting) braces. A key without `=` or with an empty value is kept
/// with an empty value, which marks the entry as removed.
pub fn parse_entries(text: &str) -> Result<DataSetEntries, ParseError> {
    let mut entries = DataSetEntries::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let start = i;
        while i < chars.len() && chars[i] != '=' && !chars[i].is_whitespace() {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        if name.is_empty() {
            return Err(ParseError::Entries(text.to_owned()));
        }

        if i >= chars.len() || chars[i] != '=' {
            entries.insert(name, String::new());
            continue;
        }
        i += 1;

        let value = match chars.get(i).copied() {
            Some('{') => {
                let mut depth = 0usize;
                let open = i;
                loop {
                    match chars.get(i) {
                        Some('{') => depth += 1,
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => return Err(ParseError::Entries(text.to_owned())),
                    }
                    i += 1;
                }
                let value: String = chars[open + 1..i].iter().collect();
                i += 1;
                value
            }
            Some(quote) if quote == '"' || quote == '\'' => {
                let open = i;
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ParseError::Entries(text.to_owned()));
                }
                let value: String = chars[open + 1..i].iter().collect();
                i += 1;
                value
            }
            _ => {
                let open = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                chars[open..i].iter().collect()
            }
        };

        entries.insert(name, value);
    }

    Ok(entries)
}
