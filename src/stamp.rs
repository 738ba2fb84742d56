//! Timestamp text handling
//!
//! Every artifact carries its timestamps as text. A run reads and writes one
//! fixed style; text that does not match that style exactly is rejected with
//! [`TraceError::Timestamp`] rather than guessed at.

use crate::error::TraceError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// chrono format string for [`TimestampStyle::Iso`]
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const CONSTRUCTOR_PREFIX: &str = "datetime(";

/// Textual timestamp style used by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStyle {
    /// `2023-04-19T00:02:27`
    #[default]
    Iso,
    /// `datetime(2023, 4, 19, 0, 2, 27)`, the badge vendor's export notation.
    /// Trailing zero seconds are omitted when formatting.
    Constructor,
}

impl TimestampStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampStyle::Iso => "iso",
            TimestampStyle::Constructor => "constructor",
        }
    }

    /// Parse timestamp text written in this style
    pub fn parse(&self, text: &str) -> Result<NaiveDateTime, TraceError> {
        match self {
            TimestampStyle::Iso => parse_iso(text),
            TimestampStyle::Constructor => parse_constructor(text),
        }
    }

    /// Format a timestamp in this style
    pub fn format(&self, moment: NaiveDateTime) -> String {
        match self {
            TimestampStyle::Iso => moment.format(ISO_FORMAT).to_string(),
            TimestampStyle::Constructor => format_constructor(moment),
        }
    }
}

impl FromStr for TimestampStyle {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iso" => Ok(TimestampStyle::Iso),
            "constructor" => Ok(TimestampStyle::Constructor),
            other => Err(TraceError::Config(format!(
                "unknown timestamp style {other:?} (expected iso or constructor)"
            ))),
        }
    }
}

fn parse_iso(text: &str) -> Result<NaiveDateTime, TraceError> {
    // YYYY-MM-DDTHH:MM:SS, every position fixed
    let bytes = text.as_bytes();
    if bytes.len() != 19 {
        return Err(TraceError::timestamp(
            text,
            "expected YYYY-MM-DDTHH:MM:SS",
        ));
    }
    for (i, b) in bytes.iter().enumerate() {
        let ok = match i {
            4 | 7 => *b == b'-',
            10 => *b == b'T',
            13 | 16 => *b == b':',
            _ => b.is_ascii_digit(),
        };
        if !ok {
            return Err(TraceError::timestamp(
                text,
                format!("unexpected character at position {i}"),
            ));
        }
    }
    NaiveDateTime::parse_from_str(text, ISO_FORMAT)
        .map_err(|e| TraceError::timestamp(text, e.to_string()))
}

fn parse_constructor(text: &str) -> Result<NaiveDateTime, TraceError> {
    let inner = text
        .strip_prefix(CONSTRUCTOR_PREFIX)
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| TraceError::timestamp(text, "expected datetime(Y, M, D, h, m[, s[, us]])"))?;

    let mut fields = Vec::with_capacity(7);
    for part in inner.split(", ") {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TraceError::timestamp(
                text,
                format!("field {part:?} is not an unsigned integer"),
            ));
        }
        let value: u32 = part
            .parse()
            .map_err(|_| TraceError::timestamp(text, format!("field {part:?} out of range")))?;
        fields.push(value);
    }

    if !(5..=7).contains(&fields.len()) {
        return Err(TraceError::timestamp(
            text,
            format!("expected 5 to 7 fields, found {}", fields.len()),
        ));
    }

    let second = fields.get(5).copied().unwrap_or(0);
    let micro = fields.get(6).copied().unwrap_or(0);
    let year = i32::try_from(fields[0])
        .map_err(|_| TraceError::timestamp(text, "year out of range"))?;

    NaiveDate::from_ymd_opt(year, fields[1], fields[2])
        .and_then(|date| date.and_hms_micro_opt(fields[3], fields[4], second, micro))
        .ok_or_else(|| TraceError::timestamp(text, "no such calendar date or time"))
}

fn format_constructor(moment: NaiveDateTime) -> String {
    let micro = moment.nanosecond() / 1_000;
    let mut out = format!(
        "{}{}, {}, {}, {}, {}",
        CONSTRUCTOR_PREFIX,
        moment.year(),
        moment.month(),
        moment.day(),
        moment.hour(),
        moment.minute()
    );
    if moment.second() != 0 || micro != 0 {
        out.push_str(&format!(", {}", moment.second()));
    }
    if micro != 0 {
        out.push_str(&format!(", {micro}"));
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_iso_parse_and_format() {
        let t = TimestampStyle::Iso.parse("2023-04-19T00:02:27").unwrap();
        assert_eq!(t, at(0, 2, 27));
        assert_eq!(TimestampStyle::Iso.format(t), "2023-04-19T00:02:27");
    }

    #[test]
    fn test_iso_rejects_loose_input() {
        for bad in [
            "2023-4-19T00:02:27",
            "2023-04-19 00:02:27",
            "2023-04-19T00:02:27Z",
            "2023-02-30T00:00:00",
            "",
        ] {
            let err = TimestampStyle::Iso.parse(bad).unwrap_err();
            assert!(matches!(err, TraceError::Timestamp { .. }), "{bad}");
        }
    }

    #[test]
    fn test_constructor_parse_variants() {
        let style = TimestampStyle::Constructor;
        assert_eq!(style.parse("datetime(2023, 4, 19, 0, 2, 27)").unwrap(), at(0, 2, 27));
        assert_eq!(style.parse("datetime(2023, 4, 19, 7, 0)").unwrap(), at(7, 0, 0));
    }

    #[test]
    fn test_constructor_rejects_expressions() {
        let style = TimestampStyle::Constructor;
        for bad in [
            "datetime.datetime(2023, 4, 19, 0, 2, 27)",
            "datetime(2023, 4, 19)",
            "datetime(2023, 4, 19, 0, 2, 27, 0, 1)",
            "datetime(2023,4,19,0,2,27)",
            "datetime(2023, 4, 19, 0, 2, -1)",
            "datetime(2023, 13, 19, 0, 2, 27)",
            "__import__('os')",
        ] {
            assert!(style.parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_constructor_format_omits_zero_seconds() {
        let style = TimestampStyle::Constructor;
        assert_eq!(style.format(at(7, 0, 0)), "datetime(2023, 4, 19, 7, 0)");
        assert_eq!(style.format(at(0, 2, 27)), "datetime(2023, 4, 19, 0, 2, 27)");
        let text = style.format(at(19, 5, 0));
        assert_eq!(style.parse(&text).unwrap(), at(19, 5, 0));
    }

    #[test]
    fn test_style_from_str() {
        assert_eq!("iso".parse::<TimestampStyle>().unwrap(), TimestampStyle::Iso);
        assert_eq!(
            "constructor".parse::<TimestampStyle>().unwrap(),
            TimestampStyle::Constructor
        );
        assert!("repr".parse::<TimestampStyle>().is_err());
    }

    #[test]
    fn test_style_names_match_config_values() {
        for style in [TimestampStyle::Iso, TimestampStyle::Constructor] {
            assert_eq!(style.as_str().parse::<TimestampStyle>().unwrap(), style);
            assert_eq!(
                serde_json::to_value(style).unwrap(),
                serde_json::json!(style.as_str())
            );
        }
    }
}
