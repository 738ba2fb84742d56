//! Occupancy history assembly
//!
//! Joins each second of the ledger with the badge states inferred for that
//! second into the record that is persisted per shift.

use crate::error::TraceError;
use crate::ledger::{Ledger, MomentContacts};
use crate::occupancy::{
    BadgeState, OccupancyStateMachine, StateHistory, StateSnapshot, TransitionStats,
};
use crate::registry::RoomId;
use crate::stamp::TimestampStyle;
use crate::types::EntityId;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Sparse room state: only the attributes that hold are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inroom: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
}

impl RoomState {
    /// `None` for badges not associated with any room
    pub fn from_badge_state(state: &BadgeState) -> Option<Self> {
        let room = state.room()?;
        Some(Self {
            room: Some(room.clone()),
            inroom: state.inroom(),
            pending: state.pending(),
        })
    }
}

/// What one badge was near, and where it was, during one second
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    /// Sorted contacted ids
    pub contacts: Vec<EntityId>,
    pub state: Option<RoomState>,
}

/// Records of every badge for one second
pub type MomentRecords = BTreeMap<EntityId, OccupancyRecord>;

/// Per-second occupancy records of one shift, in time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccupancyHistory {
    moments: Vec<(NaiveDateTime, MomentRecords)>,
}

impl OccupancyHistory {
    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, &MomentRecords)> {
        self.moments.iter().map(|(t, records)| (*t, records))
    }

    pub fn get(&self, t: NaiveDateTime) -> Option<&MomentRecords> {
        self.moments
            .binary_search_by_key(&t, |(moment, _)| *moment)
            .ok()
            .map(|i| &self.moments[i].1)
    }

    pub fn record(&self, t: NaiveDateTime, badge: &EntityId) -> Option<&OccupancyRecord> {
        self.get(t).and_then(|records| records.get(badge))
    }

    /// Keyed by timestamp text, in time order
    pub fn to_ordered(&self, style: TimestampStyle) -> IndexMap<String, &MomentRecords> {
        self.moments
            .iter()
            .map(|(t, records)| (style.format(*t), records))
            .collect()
    }

    pub fn from_ordered(
        ordered: IndexMap<String, MomentRecords>,
        style: TimestampStyle,
    ) -> Result<Self, TraceError> {
        let mut moments = Vec::with_capacity(ordered.len());
        for (stamp, records) in ordered {
            moments.push((style.parse(&stamp)?, records));
        }
        if moments.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(TraceError::StructuralViolation(
                "occupancy history is not in time order".to_string(),
            ));
        }
        Ok(Self { moments })
    }
}

/// Joins ledger contacts with inferred states
pub struct RoomHistoryCombiner;

impl RoomHistoryCombiner {
    pub fn combine(ledger: &Ledger, states: &StateHistory) -> Result<OccupancyHistory, TraceError> {
        if ledger.len() != states.len() {
            return Err(TraceError::StructuralViolation(format!(
                "ledger has {} seconds but {} state snapshots",
                ledger.len(),
                states.len()
            )));
        }

        let mut moments = Vec::with_capacity(ledger.len());
        for ((moment, contacts), snapshot) in ledger.iter().zip(states.snapshots()) {
            if snapshot.moment() != moment {
                return Err(TraceError::StructuralViolation(format!(
                    "state snapshot for {} paired with ledger second {}",
                    snapshot.moment(),
                    moment
                )));
            }
            moments.push((moment, moment_records(contacts, snapshot)?));
        }

        Ok(OccupancyHistory { moments })
    }

    /// Run `machine` over `ledger`, folding each second into the history as
    /// soon as its snapshot exists
    pub fn infer(
        ledger: &Ledger,
        machine: &OccupancyStateMachine<'_>,
    ) -> Result<(OccupancyHistory, TransitionStats), TraceError> {
        let mut moments = Vec::with_capacity(ledger.len());
        let stats = machine.replay(ledger, |snapshot, contacts| {
            moments.push((snapshot.moment(), moment_records(contacts, snapshot)?));
            Ok(())
        })?;
        Ok((OccupancyHistory { moments }, stats))
    }
}

fn moment_records(
    contacts: &MomentContacts,
    snapshot: &StateSnapshot,
) -> Result<MomentRecords, TraceError> {
    let mut records = MomentRecords::new();
    for (badge, badge_contacts) in contacts {
        let state = snapshot.get(badge).ok_or_else(|| {
            TraceError::StructuralViolation(format!(
                "badge {badge} has no state at {}",
                snapshot.moment()
            ))
        })?;
        records.insert(
            badge.clone(),
            OccupancyRecord {
                contacts: badge_contacts.keys().cloned().collect(),
                state: RoomState::from_badge_state(state),
            },
        );
    }
    Ok(records)
}
