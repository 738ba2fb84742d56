//! Second-by-second contact ledger
//!
//! Expands a shift's contact intervals into one entry per second: for every
//! worn badge, the ids it was near and at what distance. Anchors only ever
//! appear as contacted ids.

use crate::config::LedgerConfig;
use crate::error::TraceError;
use crate::types::{ContactInterval, EntityId};
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Contacted id to distance (inches)
pub type ContactMap = BTreeMap<EntityId, u32>;

/// Worn badge to its contacts during one second
pub type MomentContacts = BTreeMap<EntityId, ContactMap>;

/// Dense per-second contact history of one shift
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    start: NaiveDateTime,
    moments: Vec<MomentContacts>,
    badges: BTreeSet<EntityId>,
}

impl Ledger {
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Last second covered (inclusive)
    pub fn end(&self) -> NaiveDateTime {
        self.moment(self.moments.len().saturating_sub(1))
    }

    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    /// Timestamp of the `index`-th second
    pub fn moment(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::seconds(index as i64)
    }

    /// Worn badges tracked at every second
    pub fn badges(&self) -> &BTreeSet<EntityId> {
        &self.badges
    }

    pub fn get(&self, t: NaiveDateTime) -> Option<&MomentContacts> {
        let offset = (t - self.start).num_seconds();
        usize::try_from(offset).ok().and_then(|i| self.moments.get(i))
    }

    pub fn contacts(&self, t: NaiveDateTime, badge: &EntityId) -> Option<&ContactMap> {
        self.get(t).and_then(|moment| moment.get(badge))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, &MomentContacts)> + '_ {
        self.moments
            .iter()
            .enumerate()
            .map(move |(i, contacts)| (self.moment(i), contacts))
    }
}

/// Builds a [`Ledger`] from contact intervals
#[derive(Debug, Clone, Default)]
pub struct HistoryExpander {
    config: LedgerConfig,
}

impl HistoryExpander {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }

    /// Expand intervals into a ledger covering `[first start, last start + tail]`.
    ///
    /// Interval tails running past that horizon are cut off.
    pub fn expand(&self, intervals: &[ContactInterval]) -> Result<Ledger, TraceError> {
        let first = intervals.iter().map(|i| i.start).min().ok_or(TraceError::NoIntervals)?;
        let last = intervals.iter().map(|i| i.start).max().ok_or(TraceError::NoIntervals)?;

        let span = usize::try_from((last - first).num_seconds()).map_err(|_| {
            TraceError::StructuralViolation("interval starts out of order".to_string())
        })?;
        let len = span + self.config.tail_s as usize + 1;

        let badges: BTreeSet<EntityId> = intervals
            .iter()
            .flat_map(|i| [&i.badge, &i.other])
            .filter(|id| id.is_worn())
            .cloned()
            .collect();

        let template: MomentContacts = badges
            .iter()
            .map(|badge| (badge.clone(), ContactMap::new()))
            .collect();
        let mut moments = vec![template; len];

        for interval in intervals.iter().filter(|i| i.badge.is_worn()) {
            let offset = (interval.start - first).num_seconds() as usize;
            for second in offset..offset + interval.duration_s as usize {
                let Some(moment) = moments.get_mut(second) else {
                    break;
                };
                let contacts = moment.get_mut(&interval.badge).ok_or_else(|| {
                    TraceError::StructuralViolation(format!(
                        "badge {} missing from ledger",
                        interval.badge
                    ))
                })?;
                contacts.insert(interval.other.clone(), interval.distance_in);
            }
        }

        debug!(
            seconds = len,
            badges = badges.len(),
            intervals = intervals.len(),
            "expanded ledger"
        );

        Ok(Ledger {
            start: first,
            moments,
            badges,
        })
    }
}
