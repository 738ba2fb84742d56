//! Pipeline orchestration
//!
//! This module provides the public API for Ward Trace.
//! It drives a shift through every stage, from raw badge records to the
//! persisted occupancy history, and runs batches of shifts in parallel.

use crate::combine::{OccupancyHistory, RoomHistoryCombiner};
use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::ingest::RawFeed;
use crate::intervals::IntervalBuilder;
use crate::ledger::HistoryExpander;
use crate::occupancy::{OccupancyStateMachine, TransitionStats};
use crate::persist::{self, ArtifactLayout};
use crate::registry::AnchorRegistry;
use crate::shifts::ShiftTable;
use crate::types::{ContactInterval, RawObservation};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

/// Build one shift's contact intervals from a raw JSON feed using the
/// default configuration.
///
/// # Example
/// ```ignore
/// let intervals = contact_intervals(&raw_json, 2)?;
/// ```
pub fn contact_intervals(raw_json: &str, shift: usize) -> Result<Vec<ContactInterval>, TraceError> {
    let config = TraceConfig::default();
    let table = ShiftTable::new(&config.shifts);
    let feed = RawFeed::from_json(raw_json, config.timestamp_style, &table)?;
    let processor = ShiftProcessor::new(config, AnchorRegistry::default())?;
    processor.build_intervals(shift, feed.shift(shift))
}

/// Occupancy history of one shift with the transition counts behind it
#[derive(Debug, Clone)]
pub struct ShiftHistory {
    pub history: OccupancyHistory,
    pub stats: TransitionStats,
    pub badges: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Ok,
    Failed,
}

/// Outcome of one shift in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftReport {
    pub shift: usize,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badges: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitions: Option<TransitionStats>,
}

impl ShiftReport {
    fn ok(shift: usize) -> Self {
        Self {
            shift,
            status: ReportStatus::Ok,
            message: None,
            records: None,
            intervals: None,
            seconds: None,
            badges: None,
            transitions: None,
        }
    }

    fn failed(shift: usize, error: &TraceError) -> Self {
        Self {
            status: ReportStatus::Failed,
            message: Some(error.to_string()),
            ..Self::ok(shift)
        }
    }

    fn with_history(mut self, history: ShiftHistory) -> Self {
        self.seconds = Some(history.history.len());
        self.badges = Some(history.badges);
        self.transitions = Some(history.stats);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReportStatus::Ok
    }
}

/// Per-shift processor holding the run's configuration and anchor registry.
///
/// A processor is shared read-only across the worker threads of a batch.
pub struct ShiftProcessor {
    config: TraceConfig,
    registry: AnchorRegistry,
    table: ShiftTable,
}

impl ShiftProcessor {
    /// Create a processor, validating the configuration
    pub fn new(config: TraceConfig, registry: AnchorRegistry) -> Result<Self, TraceError> {
        config.validate()?;
        let table = ShiftTable::new(&config.shifts);
        Ok(Self {
            config,
            registry,
            table,
        })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn table(&self) -> &ShiftTable {
        &self.table
    }

    /// Stage 1: raw records of a production shift to contact intervals
    pub fn build_intervals(
        &self,
        shift: usize,
        raw: &[RawObservation],
    ) -> Result<Vec<ContactInterval>, TraceError> {
        let window = self.table.production_window(shift)?;
        Ok(IntervalBuilder::new(self.config.intervals.clone()).build(&window, raw))
    }

    /// Stages 2-4: contact intervals to the occupancy history
    pub fn build_history(&self, intervals: &[ContactInterval]) -> Result<ShiftHistory, TraceError> {
        let ledger = HistoryExpander::new(self.config.ledger.clone()).expand(intervals)?;
        let machine = OccupancyStateMachine::new(&self.registry, self.config.occupancy.clone());
        let (history, stats) = RoomHistoryCombiner::infer(&ledger, &machine)?;
        Ok(ShiftHistory {
            history,
            stats,
            badges: ledger.badges().len(),
        })
    }

    /// Build and save one shift's contact intervals
    pub fn process_intervals(
        &self,
        layout: &ArtifactLayout,
        shift: usize,
        raw: &[RawObservation],
    ) -> Result<ShiftReport, TraceError> {
        let intervals = self.build_intervals(shift, raw)?;
        persist::write_intervals(
            &layout.intervals_path(shift),
            &intervals,
            self.config.timestamp_style,
            self.config.compression_level,
        )?;
        Ok(ShiftReport {
            records: Some(raw.len()),
            intervals: Some(intervals.len()),
            ..ShiftReport::ok(shift)
        })
    }

    /// Build and save one shift's history from its saved contact intervals
    pub fn process_history(
        &self,
        layout: &ArtifactLayout,
        shift: usize,
    ) -> Result<ShiftReport, TraceError> {
        self.table.production_window(shift)?;
        let intervals =
            persist::read_intervals(&layout.intervals_path(shift), self.config.timestamp_style)?;
        let report = ShiftReport {
            intervals: Some(intervals.len()),
            ..ShiftReport::ok(shift)
        };
        self.save_history(layout, shift, &intervals, report)
    }

    /// Both stages for one shift, keeping the intervals in memory in between
    pub fn process_shift(
        &self,
        layout: &ArtifactLayout,
        shift: usize,
        raw: &[RawObservation],
    ) -> Result<ShiftReport, TraceError> {
        let intervals = self.build_intervals(shift, raw)?;
        persist::write_intervals(
            &layout.intervals_path(shift),
            &intervals,
            self.config.timestamp_style,
            self.config.compression_level,
        )?;
        let report = ShiftReport {
            records: Some(raw.len()),
            intervals: Some(intervals.len()),
            ..ShiftReport::ok(shift)
        };
        self.save_history(layout, shift, &intervals, report)
    }

    fn save_history(
        &self,
        layout: &ArtifactLayout,
        shift: usize,
        intervals: &[ContactInterval],
        report: ShiftReport,
    ) -> Result<ShiftReport, TraceError> {
        let history = self.build_history(intervals)?;
        persist::write_history(
            &layout.history_path(shift),
            &history.history,
            self.config.timestamp_style,
            self.config.compression_level,
        )?;
        Ok(report.with_history(history))
    }

    /// Build contact interval files for `shifts` in parallel
    pub fn run_intervals(
        &self,
        layout: &ArtifactLayout,
        feed: &RawFeed,
        shifts: &[usize],
    ) -> Vec<ShiftReport> {
        batch(shifts, |shift| self.process_intervals(layout, shift, feed.shift(shift)))
    }

    /// Build history files for `shifts` in parallel from saved interval files
    pub fn run_histories(&self, layout: &ArtifactLayout, shifts: &[usize]) -> Vec<ShiftReport> {
        batch(shifts, |shift| self.process_history(layout, shift))
    }

    /// Run every stage for `shifts` in parallel
    pub fn run(
        &self,
        layout: &ArtifactLayout,
        feed: &RawFeed,
        shifts: &[usize],
    ) -> Vec<ShiftReport> {
        batch(shifts, |shift| self.process_shift(layout, shift, feed.shift(shift)))
    }
}

/// Run `job` for every shift; a failing shift is reported and never aborts
/// the others. Reports come back in the order of `shifts`.
fn batch<F>(shifts: &[usize], job: F) -> Vec<ShiftReport>
where
    F: Fn(usize) -> Result<ShiftReport, TraceError> + Sync + Send,
{
    shifts
        .par_iter()
        .map(|&shift| match job(shift) {
            Ok(report) => {
                info!(
                    shift,
                    intervals = ?report.intervals,
                    seconds = ?report.seconds,
                    transitions = ?report.transitions,
                    "shift done"
                );
                report
            }
            Err(e) => {
                warn!(shift, structural = e.is_structural(), error = %e, "shift failed");
                ShiftReport::failed(shift, &e)
            }
        })
        .collect()
}
