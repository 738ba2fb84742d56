//! Core types for the Ward Trace pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: tagged entity ids, raw observations, contact intervals and the
//! tuple rows used on the wire.

use crate::error::TraceError;
use crate::stamp::TimestampStyle;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Category of a sensor id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Fixed sensor mounted in a room
    Anchor,
    Nurse,
    Provider,
    Support,
    /// Worn badge whose role could not be determined
    Unknown,
}

impl EntityKind {
    /// Classify a raw id. This is the only place id prefixes are inspected.
    pub fn classify(name: &str) -> Self {
        match name.as_bytes().first() {
            Some(b'b') => EntityKind::Anchor,
            Some(b'n') => EntityKind::Nurse,
            Some(b'p') => EntityKind::Provider,
            Some(b's') => EntityKind::Support,
            _ => EntityKind::Unknown,
        }
    }

    /// Whether ids of this kind are carried by a person
    pub fn is_worn(&self) -> bool {
        !matches!(self, EntityKind::Anchor)
    }
}

/// Sensor id tagged with its [`EntityKind`] when it is decoded.
///
/// Cloning is cheap; the ledger copies ids once per second of contact.
#[derive(Clone)]
pub struct EntityId {
    name: Arc<str>,
    kind: EntityKind,
}

impl EntityId {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: EntityKind::classify(name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_anchor(&self) -> bool {
        self.kind == EntityKind::Anchor
    }

    pub fn is_worn(&self) -> bool {
        self.kind.is_worn()
    }
}

// Equality, ordering and hashing go by name only; the kind is a function of it.
impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityId {}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        EntityId::new(name)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EntityId::new(&name))
    }
}

/// One array row of the raw feed or of an interval file:
/// `[badge, other, timestamp, distance_in, duration_s]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleRow(pub EntityId, pub EntityId, pub String, pub u32, pub u32);

/// A single record reported by a badge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawObservation {
    pub badge: EntityId,
    pub other: EntityId,
    pub timestamp: NaiveDateTime,
    /// Reported distance (inches)
    pub distance_in: u32,
    /// Reported duration (seconds); zero marks an end-of-contact record
    pub duration_s: u32,
}

impl RawObservation {
    pub fn from_row(row: TupleRow, style: TimestampStyle) -> Result<Self, TraceError> {
        let TupleRow(badge, other, stamp, distance_in, duration_s) = row;
        Ok(Self {
            badge,
            other,
            timestamp: style.parse(&stamp)?,
            distance_in,
            duration_s,
        })
    }

    /// Both ends are anchors; such records come from anchors mounted too close together
    pub fn is_anchor_pair(&self) -> bool {
        self.badge.is_anchor() && self.other.is_anchor()
    }
}

/// A sustained proximity event between two ids
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactInterval {
    pub badge: EntityId,
    pub other: EntityId,
    pub start: NaiveDateTime,
    /// Distance (inches)
    pub distance_in: u32,
    /// Duration (seconds), always positive
    pub duration_s: u32,
}

impl ContactInterval {
    /// First second after the interval
    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::seconds(i64::from(self.duration_s))
    }

    pub fn same_pair(&self, other: &ContactInterval) -> bool {
        self.badge == other.badge && self.other == other.other
    }

    /// The same contact as seen from the other id
    pub fn reversed(&self) -> Self {
        Self {
            badge: self.other.clone(),
            other: self.badge.clone(),
            ..self.clone()
        }
    }

    pub fn to_row(&self, style: TimestampStyle) -> TupleRow {
        TupleRow(
            self.badge.clone(),
            self.other.clone(),
            style.format(self.start),
            self.distance_in,
            self.duration_s,
        )
    }

    pub fn from_row(row: TupleRow, style: TimestampStyle) -> Result<Self, TraceError> {
        let TupleRow(badge, other, stamp, distance_in, duration_s) = row;
        Ok(Self {
            badge,
            other,
            start: style.parse(&stamp)?,
            distance_in,
            duration_s,
        })
    }
}

impl From<RawObservation> for ContactInterval {
    fn from(obs: RawObservation) -> Self {
        Self {
            badge: obs.badge,
            other: obs.other,
            start: obs.timestamp,
            distance_in: obs.distance_in,
            duration_s: obs.duration_s,
        }
    }
}
