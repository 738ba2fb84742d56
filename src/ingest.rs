//! Raw feed ingestion
//!
//! Decodes the badge vendor's export (a JSON array of
//! `[badge, other, timestamp, distance, duration]` rows), drops records that
//! can never be real contacts and splits the remainder by shift.

use crate::error::TraceError;
use crate::shifts::ShiftTable;
use crate::stamp::TimestampStyle;
use crate::types::{RawObservation, TupleRow};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Counts gathered while ingesting a feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub rows: usize,
    /// Anchor-to-anchor records (anchors mounted too close together)
    pub anchor_pairs: usize,
    /// Records outside every production shift
    pub outside_production: usize,
    pub per_shift: BTreeMap<usize, usize>,
}

/// Raw observations grouped by production shift
#[derive(Debug, Clone, Default)]
pub struct RawFeed {
    shifts: BTreeMap<usize, Vec<RawObservation>>,
    summary: IngestSummary,
}

impl RawFeed {
    /// Parse a JSON array of raw rows
    pub fn parse_array(json: &str) -> Result<Vec<TupleRow>, TraceError> {
        let rows: Vec<TupleRow> = serde_json::from_str(json)?;
        Ok(rows)
    }

    /// Decode rows, drop anchor pairs and partition by shift
    pub fn from_rows(
        rows: Vec<TupleRow>,
        style: TimestampStyle,
        table: &ShiftTable,
    ) -> Result<Self, TraceError> {
        let mut summary = IngestSummary {
            rows: rows.len(),
            ..Default::default()
        };

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows {
            let obs = RawObservation::from_row(row, style)?;
            if obs.is_anchor_pair() {
                summary.anchor_pairs += 1;
                continue;
            }
            observations.push(obs);
        }

        let (shifts, outside) = table.partition(observations, |obs| obs.timestamp);
        summary.outside_production = outside;
        summary.per_shift = shifts.iter().map(|(n, obs)| (*n, obs.len())).collect();

        for (n, count) in &summary.per_shift {
            debug!(shift = n, records = count, "partitioned raw records");
        }
        info!(
            rows = summary.rows,
            anchor_pairs = summary.anchor_pairs,
            outside = summary.outside_production,
            shifts = summary.per_shift.len(),
            "ingested raw feed"
        );

        Ok(Self { shifts, summary })
    }

    /// Parse and ingest a JSON feed in one step
    pub fn from_json(
        json: &str,
        style: TimestampStyle,
        table: &ShiftTable,
    ) -> Result<Self, TraceError> {
        Self::from_rows(Self::parse_array(json)?, style, table)
    }

    pub fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    /// Records of one shift; empty when the shift saw no data
    pub fn shift(&self, index: usize) -> &[RawObservation] {
        self.shifts.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn shift_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.shifts.keys().copied()
    }
}
