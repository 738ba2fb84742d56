//! Per-shift badge roster
//!
//! Lists the badges seen during a shift, grouped by role. Staff changing over
//! between shifts inflate the count at both ends, so the roster can be limited
//! to the center hours of the shift.

use crate::error::TraceError;
use crate::types::{ContactInterval, EntityId, EntityKind};
use chrono::{Datelike, Duration};
use serde::Serialize;
use std::collections::BTreeSet;

/// Badges observed in one shift
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShiftRoster {
    pub nurses: BTreeSet<EntityId>,
    pub providers: BTreeSet<EntityId>,
    pub support: BTreeSet<EntityId>,
    /// Three-letter weekday on which the shift started
    pub day_of_week: String,
}

impl ShiftRoster {
    /// Build the roster from a shift's contact intervals.
    ///
    /// The shift must span `shift_hours` (rounded) between its first and last
    /// interval start. Only intervals starting within the middle
    /// `center_hours` are counted.
    pub fn from_intervals(
        intervals: &[ContactInterval],
        shift_hours: u32,
        center_hours: u32,
    ) -> Result<Self, TraceError> {
        if center_hours > shift_hours {
            return Err(TraceError::Config(format!(
                "center hours ({center_hours}) exceed the shift length ({shift_hours})"
            )));
        }
        let first = intervals.iter().map(|i| i.start).min().ok_or(TraceError::NoIntervals)?;
        let last = intervals.iter().map(|i| i.start).max().ok_or(TraceError::NoIntervals)?;

        let span_hours = ((last - first).num_seconds() as f64 / 3600.0).round() as i64;
        if span_hours != i64::from(shift_hours) {
            return Err(TraceError::StructuralViolation(format!(
                "intervals span {span_hours} hours, expected {shift_hours}"
            )));
        }

        let offset = Duration::hours(i64::from((shift_hours - center_hours) / 2));
        let (from, to) = (first + offset, last - offset);

        let mut roster = ShiftRoster {
            day_of_week: first.weekday().to_string(),
            ..Default::default()
        };
        for interval in intervals.iter().filter(|i| from <= i.start && i.start <= to) {
            let badge = interval.badge.clone();
            match badge.kind() {
                EntityKind::Nurse => roster.nurses.insert(badge),
                EntityKind::Provider => roster.providers.insert(badge),
                EntityKind::Support => roster.support.insert(badge),
                EntityKind::Anchor | EntityKind::Unknown => false,
            };
        }
        Ok(roster)
    }

    /// Badges across all roles
    pub fn total(&self) -> usize {
        self.nurses.len() + self.providers.len() + self.support.len()
    }
}
