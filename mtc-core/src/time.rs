use std::fmt;

use serde::{Deserialize, Serialize};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Unix-epoch microseconds.
///
/// Zero or negative values mean "unset": the receiving side stamps the
/// observation with its own clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const UNSET: Self = Self(0);

    pub fn now() -> Self {
        Self(jiff::Timestamp::now().as_microsecond())
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 > 0
    }

    /// Returns `self` when set, otherwise `fallback`.
    pub fn or(self, fallback: Timestamp) -> Timestamp {
        if self.is_set() { self } else { fallback }
    }

    /// Parses an ISO-8601 / RFC 3339 instant. A missing offset is read as UTC.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || !text.as_bytes()[0].is_ascii_digit() {
            return None;
        }

        if let Ok(ts) = text.parse::<jiff::Timestamp>() {
            return Some(Self(ts.as_microsecond()));
        }

        text.parse::<jiff::civil::DateTime>()
            .ok()
            .and_then(|dt| dt.to_zoned(jiff::tz::TimeZone::UTC).ok())
            .map(|zoned| Self(zoned.timestamp().as_microsecond()))
    }
}

impl From<jiff::Timestamp> for Timestamp {
    fn from(ts: jiff::Timestamp) -> Self {
        Self(ts.as_microsecond())
    }
}

/// Formats as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.0.div_euclid(MICROS_PER_SECOND);
        let micros = self.0.rem_euclid(MICROS_PER_SECOND);

        match jiff::Timestamp::from_second(seconds) {
            Ok(whole) => {
                let whole = whole.to_string();
                write!(f, "{}.{:06}Z", whole.trim_end_matches('Z'), micros)
            }
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_microseconds() {
        let ts = Timestamp(1_700_000_000_123_456);
        assert_eq!(ts.to_string(), "2023-11-14T22:13:20.123456Z");
    }

    #[test]
    fn parses_what_it_formats() {
        let ts = Timestamp(1_700_000_000_000_042);
        assert_eq!(Timestamp::parse(&ts.to_string()), Some(ts));
    }

    #[test]
    fn parses_without_offset() {
        let ts = Timestamp::parse("2023-11-14T22:13:20.5").unwrap();
        assert_eq!(ts, Timestamp(1_700_000_000_500_000));
    }

    #[test]
    fn rejects_non_timestamps() {
        assert_eq!(Timestamp::parse("temp"), None);
        assert_eq!(Timestamp::parse(""), None);
        assert_eq!(Timestamp::parse("72.5"), None);
    }

    #[test]
    fn unset_falls_back() {
        assert!(!Timestamp::UNSET.is_set());
        assert!(!Timestamp(-5).is_set());
        assert_eq!(Timestamp::UNSET.or(Timestamp(7)), Timestamp(7));
        assert_eq!(Timestamp(3).or(Timestamp(7)), Timestamp(3));
    }
}
