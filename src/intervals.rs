//! Contact interval construction
//!
//! Raw badge records arrive grouped by the second they were reported. Each
//! group is cleaned and made symmetric on its own; overlapping intervals of
//! the same ordered pair are then merged across nearby groups.
//!
//! Badges report durations in 15 second steps (at most 600 s), and the two
//! badges of a contact report it with slightly different clocks, so the same
//! contact usually shows up as a few overlapping records a few seconds apart.

use crate::config::IntervalConfig;
use crate::shifts::ShiftWindow;
use crate::types::{ContactInterval, EntityId, RawObservation};
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Builds the contact intervals of one shift
#[derive(Debug, Clone, Default)]
pub struct IntervalBuilder {
    config: IntervalConfig,
}

impl IntervalBuilder {
    pub fn new(config: IntervalConfig) -> Self {
        Self { config }
    }

    /// Turn a shift's raw records into symmetric, merged, time-sorted intervals.
    ///
    /// Records outside the window and anchor-to-anchor records are ignored.
    pub fn build(
        &self,
        window: &ShiftWindow,
        observations: &[RawObservation],
    ) -> Vec<ContactInterval> {
        let mut slots: BTreeMap<NaiveDateTime, Vec<RawObservation>> = BTreeMap::new();
        for obs in observations {
            if window.contains(obs.timestamp) && !obs.is_anchor_pair() {
                slots.entry(obs.timestamp).or_default().push(obs.clone());
            }
        }
        let slot_count = slots.len();

        let cleaned: BTreeMap<NaiveDateTime, Vec<ContactInterval>> = slots
            .into_iter()
            .map(|(t, slot)| (t, enforce_symmetry(clean(&slot, &self.config))))
            .filter(|(_, slot)| !slot.is_empty())
            .collect();
        let before_merge: usize = cleaned.values().map(Vec::len).sum();

        let merged = merge_overlaps(cleaned, self.config.merge_lookahead_s);
        let intervals: Vec<ContactInterval> = merged.into_values().flatten().collect();

        debug!(
            shift = window.index,
            records = observations.len(),
            slots = slot_count,
            absorbed = before_merge - intervals.len(),
            intervals = intervals.len(),
            "built contact intervals"
        );
        intervals
    }
}

/// Clean one group of records sharing a timestamp.
///
/// Records under the distance floor are discarded. A zero-duration record is
/// an end-of-contact marker and is dropped when the same ordered pair has a
/// record with a duration in the group; otherwise it is a fleeting contact and
/// gets the configured fleeting duration. The result is sorted and free of
/// duplicates.
pub fn clean(slot: &[RawObservation], config: &IntervalConfig) -> Vec<ContactInterval> {
    let with_duration: BTreeSet<(&EntityId, &EntityId)> = slot
        .iter()
        .filter(|obs| obs.duration_s != 0)
        .map(|obs| (&obs.badge, &obs.other))
        .collect();

    let mut out: Vec<ContactInterval> = slot
        .iter()
        .filter(|obs| obs.distance_in >= config.distance_floor_in)
        .filter(|obs| obs.duration_s != 0 || !with_duration.contains(&(&obs.badge, &obs.other)))
        .map(|obs| {
            let mut interval = ContactInterval::from(obs.clone());
            if interval.duration_s == 0 {
                interval.duration_s = config.fleeting_duration_s;
            }
            interval
        })
        .collect();

    out.sort();
    out.dedup();
    out
}

/// Make a group symmetric: every (a, b) record gets its (b, a) twin.
///
/// When the two badges disagree on the duration, only the records carrying
/// the longest duration for the pair are kept.
pub fn enforce_symmetry(slot: Vec<ContactInterval>) -> Vec<ContactInterval> {
    let mut both = Vec::with_capacity(slot.len() * 2);
    for interval in slot {
        both.push(interval.reversed());
        both.push(interval);
    }

    let mut longest: BTreeMap<(EntityId, EntityId), u32> = BTreeMap::new();
    for interval in &both {
        let entry = longest
            .entry((interval.badge.clone(), interval.other.clone()))
            .or_insert(0);
        *entry = (*entry).max(interval.duration_s);
    }

    both.retain(|interval| {
        longest
            .get(&(interval.badge.clone(), interval.other.clone()))
            .map_or(true, |max| interval.duration_s == *max)
    });
    both.sort();
    both.dedup();
    both
}

/// Merge overlapping same-pair intervals across groups.
///
/// Groups are visited in time order. Each interval looks at the groups
/// starting 1 to `lookahead_s` seconds later and absorbs any interval of the
/// same ordered pair that starts no later than its end: the survivor is
/// stretched to cover both spans and the absorbed interval is removed.
pub fn merge_overlaps(
    mut slots: BTreeMap<NaiveDateTime, Vec<ContactInterval>>,
    lookahead_s: u32,
) -> BTreeMap<NaiveDateTime, Vec<ContactInterval>> {
    let starts: Vec<NaiveDateTime> = slots.keys().copied().collect();

    for t in starts {
        let Some(mut current) = slots.remove(&t) else {
            continue;
        };
        for interval in current.iter_mut() {
            for delta in 1..=i64::from(lookahead_s) {
                if let Some(later) = slots.get_mut(&(t + Duration::seconds(delta))) {
                    absorb(interval, later);
                }
            }
        }
        slots.insert(t, current);
    }

    slots.retain(|_, slot| !slot.is_empty());
    slots
}

fn absorb(interval: &mut ContactInterval, later: &mut Vec<ContactInterval>) {
    later.retain(|candidate| {
        if !candidate.same_pair(interval) || candidate.start > interval.end() {
            return true;
        }
        if candidate.end() > interval.end() {
            let span = (candidate.end() - interval.start).num_seconds();
            interval.duration_s = u32::try_from(span).unwrap_or(u32::MAX);
        }
        false
    });
}
