//! Run configuration
//!
//! Every threshold used by the pipeline lives here with its default. A
//! configuration file only needs to name the values it changes.

use crate::error::TraceError;
use crate::stamp::TimestampStyle;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Records closer than this are badges being handed out or collected (inches)
pub const DEFAULT_DISTANCE_FLOOR_IN: u32 = 12;

/// Duration given to a start-of-contact record that never got a duration (seconds)
pub const DEFAULT_FLEETING_DURATION_S: u32 = 10;

/// Merge lookahead; matches the 15 s bucketing of reported durations
pub const DEFAULT_MERGE_LOOKAHEAD_S: u32 = 15;

/// Longest duration a badge reports; the ledger extends this far past the last start
pub const DEFAULT_LEDGER_TAIL_S: u32 = 600;

/// Unconfirmed room entries are dropped after this long (seconds)
pub const DEFAULT_PENDING_TIMEOUT_S: i64 = 180;

/// A badge in a room with no anchor contact leaves after this long (seconds)
pub const DEFAULT_INROOM_TIMEOUT_S: i64 = 60;

pub const DEFAULT_SHIFT_HOURS: u32 = 12;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Interval building parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub distance_floor_in: u32,
    pub fleeting_duration_s: u32,
    pub merge_lookahead_s: u32,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            distance_floor_in: DEFAULT_DISTANCE_FLOOR_IN,
            fleeting_duration_s: DEFAULT_FLEETING_DURATION_S,
            merge_lookahead_s: DEFAULT_MERGE_LOOKAHEAD_S,
        }
    }
}

/// Ledger parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub tail_s: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tail_s: DEFAULT_LEDGER_TAIL_S,
        }
    }
}

/// Occupancy state machine thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    pub pending_timeout_s: i64,
    pub inroom_timeout_s: i64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            pending_timeout_s: DEFAULT_PENDING_TIMEOUT_S,
            inroom_timeout_s: DEFAULT_INROOM_TIMEOUT_S,
        }
    }
}

/// Shift boundary table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// Sixteen boundaries; shift n runs from boundary n up to boundary n + 1
    pub boundaries: Vec<NaiveDateTime>,
    pub shift_hours: u32,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            boundaries: study_boundaries(),
            shift_hours: DEFAULT_SHIFT_HOURS,
        }
    }
}

/// Boundaries of the April 2023 deployment, facility local time.
///
/// Shift 0 was the walk-through used for validation, shift 1 started before
/// badges were handed out, and shift 15 overlaps anchor removal.
fn study_boundaries() -> Vec<NaiveDateTime> {
    let mut out = Vec::with_capacity(16);
    if let Some(walkthrough) = at(17, 12) {
        out.push(walkthrough);
    }
    for day in 17..=24 {
        if day > 17 {
            out.extend(at(day, 7));
        }
        out.extend(at(day, 19));
    }
    out
}

fn at(day: u32, hour: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2023, 4, day).and_then(|d| d.and_hms_opt(hour, 0, 0))
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub intervals: IntervalConfig,
    pub ledger: LedgerConfig,
    pub occupancy: OccupancyConfig,
    pub shifts: ShiftConfig,
    pub timestamp_style: TimestampStyle,
    /// gzip level 0-9
    pub compression_level: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalConfig::default(),
            ledger: LedgerConfig::default(),
            occupancy: OccupancyConfig::default(),
            shifts: ShiftConfig::default(),
            timestamp_style: TimestampStyle::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl TraceConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        let config: TraceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        if self.intervals.merge_lookahead_s == 0 {
            return Err(TraceError::Config(
                "intervals.merge_lookahead_s must be positive".to_string(),
            ));
        }
        if self.intervals.fleeting_duration_s == 0 {
            return Err(TraceError::Config(
                "intervals.fleeting_duration_s must be positive".to_string(),
            ));
        }
        if self.shifts.shift_hours == 0 {
            return Err(TraceError::Config(
                "shifts.shift_hours must be positive".to_string(),
            ));
        }
        if self.shifts.boundaries.len() < 2 {
            return Err(TraceError::Config(
                "shifts.boundaries needs at least two entries".to_string(),
            ));
        }
        if self.shifts.boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TraceError::Config(
                "shifts.boundaries must be strictly increasing".to_string(),
            ));
        }
        if self.occupancy.pending_timeout_s < 0 || self.occupancy.inroom_timeout_s < 0 {
            return Err(TraceError::Config(
                "occupancy timeouts must not be negative".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(TraceError::Config(format!(
                "compression_level {} is outside 0-9",
                self.compression_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_boundaries() {
        let b = ShiftConfig::default().boundaries;
        assert_eq!(b.len(), 16);
        assert_eq!(b[0], at(17, 12).unwrap());
        assert_eq!(b[1], at(17, 19).unwrap());
        assert_eq!(b[2], at(18, 7).unwrap());
        assert_eq!(b[14], at(24, 7).unwrap());
        assert_eq!(b[15], at(24, 19).unwrap());
    }

    #[test]
    fn test_default_validates() {
        assert!(TraceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            TraceConfig::from_json(r#"{"intervals": {"merge_lookahead_s": 30}}"#).unwrap();
        assert_eq!(config.intervals.merge_lookahead_s, 30);
        assert_eq!(config.intervals.distance_floor_in, DEFAULT_DISTANCE_FLOOR_IN);
        assert_eq!(config.occupancy.pending_timeout_s, DEFAULT_PENDING_TIMEOUT_S);
        assert_eq!(config.shifts.boundaries.len(), 16);
    }

    #[test]
    fn test_rejects_zero_lookahead() {
        let err = TraceConfig::from_json(r#"{"intervals": {"merge_lookahead_s": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, TraceError::Config(_)));
    }

    #[test]
    fn test_rejects_unsorted_boundaries() {
        let json = r#"{"shifts": {"boundaries": ["2023-04-18T07:00:00", "2023-04-17T19:00:00"]}}"#;
        assert!(TraceConfig::from_json(json).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut config = TraceConfig::default();
        config.timestamp_style = TimestampStyle::Constructor;
        let json = config.to_json().unwrap();
        assert!(json.contains("\"constructor\""));
        assert_eq!(TraceConfig::from_json(&json).unwrap(), config);
    }
}
