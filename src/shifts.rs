//! Shift table
//!
//! The deployment ran in fixed twelve-hour shifts. Shift `n` covers
//! `[boundary n, boundary n + 1)`; only shifts 1-14 feed production outputs.

use crate::config::ShiftConfig;
use crate::error::TraceError;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// First shift used for production outputs
pub const FIRST_PRODUCTION_SHIFT: usize = 1;

/// Last shift used for production outputs
pub const LAST_PRODUCTION_SHIFT: usize = 14;

/// Data quality of a shift window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    /// Walk-through before deployment
    Validation,
    /// Badges were handed out after the shift began
    Incomplete,
    Complete,
}

/// Time window of one shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShiftWindow {
    pub index: usize,
    pub start: NaiveDateTime,
    /// Exclusive
    pub end: NaiveDateTime,
    pub status: ShiftStatus,
}

impl ShiftWindow {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Odd shifts start in the evening
    pub fn is_night(&self) -> bool {
        self.index % 2 == 1
    }
}

/// Boundary table with window lookup
#[derive(Debug, Clone)]
pub struct ShiftTable {
    boundaries: Vec<NaiveDateTime>,
    shift_length: Duration,
}

impl Default for ShiftTable {
    fn default() -> Self {
        Self::new(&ShiftConfig::default())
    }
}

impl ShiftTable {
    pub fn new(config: &ShiftConfig) -> Self {
        Self {
            boundaries: config.boundaries.clone(),
            shift_length: Duration::hours(i64::from(config.shift_hours)),
        }
    }

    /// Number of windows the table defines
    pub fn window_count(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    /// Any window, including the validation walk-through
    pub fn window(&self, index: usize) -> Result<ShiftWindow, TraceError> {
        if index + 1 >= self.boundaries.len() {
            return Err(TraceError::UnknownShift(index));
        }
        let status = match index {
            0 => ShiftStatus::Validation,
            FIRST_PRODUCTION_SHIFT => ShiftStatus::Incomplete,
            _ => ShiftStatus::Complete,
        };
        Ok(ShiftWindow {
            index,
            start: self.boundaries[index],
            end: self.boundaries[index + 1],
            status,
        })
    }

    /// A window that may feed production outputs; its length is checked
    pub fn production_window(&self, index: usize) -> Result<ShiftWindow, TraceError> {
        if index < FIRST_PRODUCTION_SHIFT || index > LAST_PRODUCTION_SHIFT {
            return Err(if index + 1 < self.boundaries.len() || index == LAST_PRODUCTION_SHIFT + 1 {
                TraceError::ExcludedShift(index)
            } else {
                TraceError::UnknownShift(index)
            });
        }
        let window = self.window(index)?;
        if window.duration() != self.shift_length {
            return Err(TraceError::StructuralViolation(format!(
                "shift {} lasts {} minutes, expected {}",
                index,
                window.duration().num_minutes(),
                self.shift_length.num_minutes()
            )));
        }
        Ok(window)
    }

    /// Production shift indices present in this table
    pub fn production_indices(&self) -> impl Iterator<Item = usize> {
        let last = LAST_PRODUCTION_SHIFT.min(self.window_count().saturating_sub(1));
        FIRST_PRODUCTION_SHIFT..=last
    }

    /// Window containing `t`, if any
    pub fn locate(&self, t: NaiveDateTime) -> Option<usize> {
        let idx = self.boundaries.partition_point(|b| *b <= t);
        if idx == 0 || idx >= self.boundaries.len() {
            None
        } else {
            Some(idx - 1)
        }
    }

    /// Split items into production shifts by timestamp.
    ///
    /// Returns the buckets and the number of items that fell outside every
    /// production window.
    pub fn partition<T, F>(&self, items: Vec<T>, timestamp: F) -> (BTreeMap<usize, Vec<T>>, usize)
    where
        F: Fn(&T) -> NaiveDateTime,
    {
        let mut buckets: BTreeMap<usize, Vec<T>> = BTreeMap::new();
        let mut outside = 0;
        for item in items {
            match self.locate(timestamp(&item)) {
                Some(idx) if (FIRST_PRODUCTION_SHIFT..=LAST_PRODUCTION_SHIFT).contains(&idx) => {
                    buckets.entry(idx).or_default().push(item);
                }
                _ => outside += 1,
            }
        }
        (buckets, outside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_window_lookup() {
        let table = ShiftTable::default();
        assert_eq!(table.window_count(), 15);
        let w = table.window(2).unwrap();
        assert_eq!(w.start, at(18, 7, 0));
        assert_eq!(w.end, at(18, 19, 0));
        assert_eq!(w.status, ShiftStatus::Complete);
        assert!(!w.is_night());
        assert_eq!(table.window(0).unwrap().status, ShiftStatus::Validation);
        assert_eq!(table.window(1).unwrap().status, ShiftStatus::Incomplete);
        assert!(matches!(table.window(15), Err(TraceError::UnknownShift(15))));
    }

    #[test]
    fn test_production_excludes_walkthrough_and_teardown() {
        let table = ShiftTable::default();
        assert!(matches!(table.production_window(0), Err(TraceError::ExcludedShift(0))));
        assert!(matches!(table.production_window(15), Err(TraceError::ExcludedShift(15))));
        assert!(matches!(table.production_window(40), Err(TraceError::UnknownShift(40))));
        for n in 1..=14 {
            assert!(table.production_window(n).is_ok(), "shift {n}");
        }
        assert_eq!(table.production_indices().count(), 14);
    }

    #[test]
    fn test_production_window_length_checked() {
        let mut config = ShiftConfig::default();
        config.boundaries[3] = at(18, 20, 0);
        let table = ShiftTable::new(&config);
        assert!(matches!(
            table.production_window(2),
            Err(TraceError::StructuralViolation(_))
        ));
        assert!(matches!(
            table.production_window(3),
            Err(TraceError::StructuralViolation(_))
        ));
        assert!(table.production_window(4).is_ok());
    }

    #[test]
    fn test_locate_and_partition() {
        let table = ShiftTable::default();
        assert_eq!(table.locate(at(18, 7, 0)), Some(2));
        assert_eq!(table.locate(at(18, 6, 59)), Some(1));
        assert_eq!(table.locate(at(17, 13, 0)), Some(0));
        assert_eq!(table.locate(at(16, 13, 0)), None);
        assert_eq!(table.locate(at(24, 20, 0)), None);

        let items = vec![at(17, 13, 0), at(18, 8, 0), at(18, 9, 0), at(19, 1, 0), at(25, 1, 0)];
        let (buckets, outside) = table.partition(items, |t| *t);
        assert_eq!(outside, 2);
        assert_eq!(buckets[&2].len(), 2);
        assert_eq!(buckets[&3].len(), 1);
    }
}
