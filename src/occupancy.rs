//! Room occupancy inference
//!
//! A debounced state machine follows every worn badge through a room visit:
//!
//! - `Idle` until the badge is near a door anchor, then
//! - `Pending` for that door's room until an interior anchor (computer,
//!   vitals, sink) of the same room confirms the entry, then
//! - `InRoom` until the badge is seen elsewhere or loses every anchor for
//!   longer than the in-room timeout.
//!
//! Each second is computed from a frozen snapshot of the previous second, so
//! badges never see each other's partial updates.

use crate::config::OccupancyConfig;
use crate::error::TraceError;
use crate::ledger::{ContactMap, Ledger, MomentContacts};
use crate::registry::{AnchorRegistry, RoomId};
use crate::types::EntityId;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Room state of one badge at one second
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadgeState {
    Idle,
    /// Seen at a door; entry not yet confirmed
    Pending {
        room: RoomId,
        door: EntityId,
        doortime: NaiveDateTime,
    },
    /// Entry confirmed by an interior anchor
    InRoom {
        room: RoomId,
        door: EntityId,
        doortime: NaiveDateTime,
    },
}

impl Default for BadgeState {
    fn default() -> Self {
        BadgeState::Idle
    }
}

impl BadgeState {
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            BadgeState::Idle => None,
            BadgeState::Pending { room, .. } | BadgeState::InRoom { room, .. } => Some(room),
        }
    }

    pub fn pending(&self) -> bool {
        matches!(self, BadgeState::Pending { .. })
    }

    pub fn inroom(&self) -> bool {
        matches!(self, BadgeState::InRoom { .. })
    }
}

/// Transition counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionStats {
    /// Idle to pending
    pub entries: u64,
    /// Pending to in-room
    pub confirmations: u64,
    pub pending_timeouts: u64,
    pub inroom_timeouts: u64,
    /// Pending dropped because an anchor of another room was seen
    pub false_alarms: u64,
    /// In-room left because an anchor of another room was seen
    pub departures: u64,
    /// Dropped to idle because an unregistered anchor was seen
    pub ambiguous_exits: u64,
}

/// Everything a transition step may consult or record
#[derive(Debug)]
pub struct StepContext<'a> {
    pub registry: &'a AnchorRegistry,
    pub config: &'a OccupancyConfig,
    pub stats: TransitionStats,
}

impl<'a> StepContext<'a> {
    pub fn new(registry: &'a AnchorRegistry, config: &'a OccupancyConfig) -> Self {
        Self {
            registry,
            config,
            stats: TransitionStats::default(),
        }
    }

    /// Nearest contacted door anchor; ties go to the door listed first in the registry
    pub fn nearest_door<'c>(&self, contacts: &'c ContactMap) -> Option<&'c EntityId> {
        contacts
            .iter()
            .filter(|(id, _)| id.is_anchor() && self.registry.is_door(id))
            .min_by_key(|(id, distance)| {
                (**distance, self.registry.position(id).unwrap_or(usize::MAX))
            })
            .map(|(id, _)| id)
    }

    /// Check a badge's anchor contacts against a candidate room
    fn verdict(&self, anchors: &[&EntityId], room: &RoomId) -> Verdict {
        let mut verdict = Verdict::Consistent;
        for anchor in anchors {
            match self.registry.room_of(anchor) {
                None => return Verdict::Unregistered,
                Some(r) if r != room => verdict = Verdict::OtherRoom,
                Some(_) => {}
            }
        }
        verdict
    }

    fn has_interior(&self, anchors: &[&EntityId], room: &RoomId) -> bool {
        anchors.iter().any(|id| self.registry.is_interior_of(id, room))
    }

    /// Compute a badge's state for `now` from its state one second earlier
    pub fn transition(
        &mut self,
        previous: &BadgeState,
        now: NaiveDateTime,
        contacts: &ContactMap,
    ) -> Result<BadgeState, TraceError> {
        let anchors: Vec<&EntityId> = contacts.keys().filter(|id| id.is_anchor()).collect();

        match previous {
            BadgeState::InRoom { room, doortime, .. } => {
                if self.has_interior(&anchors, room) {
                    return Ok(previous.clone());
                }
                if let Some(door) = self.nearest_door(contacts) {
                    if self.registry.room_of_door(door)? == room {
                        return Ok(previous.clone());
                    }
                }

                if anchors.is_empty() {
                    // dropout: only the clock can take the badge out of the room
                    if elapsed(now, *doortime) > self.config.inroom_timeout_s {
                        self.stats.inroom_timeouts += 1;
                        return Ok(BadgeState::Idle);
                    }
                    return Ok(previous.clone());
                }

                if !anchors.iter().any(|id| self.registry.is_registered(id)) {
                    self.stats.ambiguous_exits += 1;
                    return Ok(BadgeState::Idle);
                }

                match self.verdict(&anchors, room) {
                    Verdict::Unregistered => {
                        self.stats.ambiguous_exits += 1;
                        Ok(BadgeState::Idle)
                    }
                    Verdict::OtherRoom => {
                        self.stats.departures += 1;
                        Ok(BadgeState::Idle)
                    }
                    Verdict::Consistent => Ok(previous.clone()),
                }
            }

            BadgeState::Idle => {
                let Some(door) = self.nearest_door(contacts) else {
                    return Ok(BadgeState::Idle);
                };
                let room = self.registry.room_of_door(door)?.clone();
                self.stats.entries += 1;
                // the new candidate is checked against this same second's contacts
                self.check_pending(room, door.clone(), now, &anchors)
            }

            BadgeState::Pending { room, door, doortime } => {
                if elapsed(now, *doortime) > self.config.pending_timeout_s {
                    self.stats.pending_timeouts += 1;
                    return Ok(BadgeState::Idle);
                }
                self.check_pending(room.clone(), door.clone(), *doortime, &anchors)
            }
        }
    }

    fn check_pending(
        &mut self,
        room: RoomId,
        door: EntityId,
        doortime: NaiveDateTime,
        anchors: &[&EntityId],
    ) -> Result<BadgeState, TraceError> {
        match self.verdict(anchors, &room) {
            Verdict::Unregistered => {
                self.stats.ambiguous_exits += 1;
                Ok(BadgeState::Idle)
            }
            Verdict::OtherRoom => {
                self.stats.false_alarms += 1;
                Ok(BadgeState::Idle)
            }
            Verdict::Consistent if self.has_interior(anchors, &room) => {
                self.stats.confirmations += 1;
                Ok(BadgeState::InRoom { room, door, doortime })
            }
            Verdict::Consistent => Ok(BadgeState::Pending { room, door, doortime }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Consistent,
    OtherRoom,
    Unregistered,
}

fn elapsed(now: NaiveDateTime, since: NaiveDateTime) -> i64 {
    (now - since).num_seconds()
}

/// Frozen states of every worn badge at one second
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    moment: NaiveDateTime,
    states: BTreeMap<EntityId, BadgeState>,
}

impl StateSnapshot {
    /// Every badge idle
    pub fn initial(moment: NaiveDateTime, badges: &BTreeSet<EntityId>) -> Self {
        Self {
            moment,
            states: badges
                .iter()
                .map(|badge| (badge.clone(), BadgeState::Idle))
                .collect(),
        }
    }

    pub fn moment(&self) -> NaiveDateTime {
        self.moment
    }

    pub fn get(&self, badge: &EntityId) -> Option<&BadgeState> {
        self.states.get(badge)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &BadgeState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Compute the snapshot for `moment` from this one
    pub fn advance(
        &self,
        moment: NaiveDateTime,
        contacts: &MomentContacts,
        ctx: &mut StepContext<'_>,
    ) -> Result<StateSnapshot, TraceError> {
        if contacts.len() != self.states.len() {
            return Err(TraceError::StructuralViolation(format!(
                "{} badges at {} but {} tracked",
                contacts.len(),
                moment,
                self.states.len()
            )));
        }

        let mut states = BTreeMap::new();
        for (badge, badge_contacts) in contacts {
            let previous = self.states.get(badge).ok_or_else(|| {
                TraceError::StructuralViolation(format!("badge {badge} has no state at {moment}"))
            })?;
            states.insert(badge.clone(), ctx.transition(previous, moment, badge_contacts)?);
        }

        Ok(StateSnapshot { moment, states })
    }
}

/// One snapshot per ledger second
#[derive(Debug, Clone)]
pub struct StateHistory {
    snapshots: Vec<StateSnapshot>,
    stats: TransitionStats,
}

impl StateHistory {
    pub fn snapshots(&self) -> &[StateSnapshot] {
        &self.snapshots
    }

    pub fn get(&self, index: usize) -> Option<&StateSnapshot> {
        self.snapshots.get(index)
    }

    pub fn stats(&self) -> &TransitionStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Runs the state machine over a ledger
pub struct OccupancyStateMachine<'a> {
    registry: &'a AnchorRegistry,
    config: OccupancyConfig,
}

impl<'a> OccupancyStateMachine<'a> {
    pub fn new(registry: &'a AnchorRegistry, config: OccupancyConfig) -> Self {
        Self { registry, config }
    }

    /// Step through every second of the ledger in order, handing each
    /// snapshot to `visit` together with that second's contacts. Only the
    /// latest snapshot is kept alive.
    pub fn replay<F>(&self, ledger: &Ledger, mut visit: F) -> Result<TransitionStats, TraceError>
    where
        F: FnMut(&StateSnapshot, &MomentContacts) -> Result<(), TraceError>,
    {
        let mut ctx = StepContext::new(self.registry, &self.config);
        let mut current = StateSnapshot::initial(ledger.start(), ledger.badges());
        let mut seconds = 0usize;

        for (moment, contacts) in ledger.iter() {
            current = current.advance(moment, contacts, &mut ctx)?;
            visit(&current, contacts)?;
            seconds += 1;
        }

        debug!(seconds, stats = ?ctx.stats, "ran occupancy state machine");
        Ok(ctx.stats)
    }

    /// Keep every snapshot of the run
    pub fn run(&self, ledger: &Ledger) -> Result<StateHistory, TraceError> {
        let mut snapshots: Vec<StateSnapshot> = Vec::with_capacity(ledger.len());
        let stats = self.replay(ledger, |snapshot, _| {
            snapshots.push(snapshot.clone());
            Ok(())
        })?;
        Ok(StateHistory { snapshots, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::HistoryExpander;
    use crate::registry::tests::sample_registry;
    use crate::types::ContactInterval;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, 18)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn at(offset: i64) -> NaiveDateTime {
        t0() + Duration::seconds(offset)
    }

    fn contacts(pairs: &[(&str, u32)]) -> ContactMap {
        pairs.iter().map(|(id, d)| (EntityId::new(id), *d)).collect()
    }

    fn pending(room: &str, door: &str, offset: i64) -> BadgeState {
        BadgeState::Pending {
            room: room.into(),
            door: door.into(),
            doortime: at(offset),
        }
    }

    fn inroom(room: &str, door: &str, offset: i64) -> BadgeState {
        BadgeState::InRoom {
            room: room.into(),
            door: door.into(),
            doortime: at(offset),
        }
    }

    #[test]
    fn test_door_then_interior_confirms_entry() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);

        let s1 = ctx
            .transition(&BadgeState::Idle, at(0), &contacts(&[("b101", 40)]))
            .unwrap();
        assert_eq!(s1, pending("101", "b101", 0));

        let s2 = ctx.transition(&s1, at(1), &contacts(&[])).unwrap();
        assert_eq!(s2, s1);

        let s3 = ctx.transition(&s2, at(5), &contacts(&[("b102", 30)])).unwrap();
        assert_eq!(s3, inroom("101", "b101", 0));
        assert_eq!(ctx.stats.entries, 1);
        assert_eq!(ctx.stats.confirmations, 1);
    }

    #[test]
    fn test_door_and_interior_in_same_second() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let s = ctx
            .transition(&BadgeState::Idle, at(0), &contacts(&[("b101", 40), ("b103", 20)]))
            .unwrap();
        assert_eq!(s, inroom("101", "b101", 0));
    }

    #[test]
    fn test_pending_times_out_after_180s() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = pending("101", "b101", 0);

        let at_limit = ctx.transition(&state, at(180), &contacts(&[])).unwrap();
        assert!(at_limit.pending());
        let after = ctx.transition(&at_limit, at(181), &contacts(&[])).unwrap();
        assert_eq!(after, BadgeState::Idle);
        assert_eq!(ctx.stats.pending_timeouts, 1);
    }

    #[test]
    fn test_pending_false_alarm_on_other_room() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = pending("101", "b101", 0);

        let s = ctx.transition(&state, at(3), &contacts(&[("b202", 50)])).unwrap();
        assert_eq!(s, BadgeState::Idle);
        assert_eq!(ctx.stats.false_alarms, 1);
    }

    #[test]
    fn test_pending_unregistered_anchor_is_ambiguous() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = pending("101", "b101", 0);

        let s = ctx
            .transition(&state, at(3), &contacts(&[("b102", 30), ("b999", 50)]))
            .unwrap();
        assert_eq!(s, BadgeState::Idle);
        assert_eq!(ctx.stats.ambiguous_exits, 1);
    }

    #[test]
    fn test_pending_ignores_worn_badges() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = pending("101", "b101", 0);
        let s = ctx.transition(&state, at(3), &contacts(&[("n9", 30)])).unwrap();
        assert_eq!(s, state);
    }

    #[test]
    fn test_inroom_times_out_without_anchors() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let mut state = inroom("101", "b101", 0);

        for s in 1..=60 {
            state = ctx.transition(&state, at(s), &contacts(&[("n2", 40)])).unwrap();
            assert!(state.inroom(), "left early at {s}");
        }
        state = ctx.transition(&state, at(61), &contacts(&[])).unwrap();
        assert_eq!(state, BadgeState::Idle);
        assert_eq!(ctx.stats.inroom_timeouts, 1);
    }

    #[test]
    fn test_inroom_exits_immediately_on_unregistered_anchor() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = inroom("101", "b101", 0);

        let s = ctx.transition(&state, at(2), &contacts(&[("b999", 40)])).unwrap();
        assert_eq!(s, BadgeState::Idle);
        assert_eq!(ctx.stats.ambiguous_exits, 1);
        assert_eq!(ctx.stats.inroom_timeouts, 0);
    }

    #[test]
    fn test_inroom_stays_near_own_door_or_interior() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = inroom("101", "b101", 0);

        let s = ctx.transition(&state, at(500), &contacts(&[("b101", 40)])).unwrap();
        assert_eq!(s, state);
        let s = ctx
            .transition(&state, at(500), &contacts(&[("b103", 40), ("b999", 10)]))
            .unwrap();
        assert_eq!(s, state);
    }

    #[test]
    fn test_inroom_leaves_for_other_room() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let state = inroom("101", "b101", 0);

        let s = ctx.transition(&state, at(10), &contacts(&[("b201", 40)])).unwrap();
        assert_eq!(s, BadgeState::Idle);
        assert_eq!(ctx.stats.departures, 1);

        let s = ctx.transition(&s, at(11), &contacts(&[("b201", 40)])).unwrap();
        assert_eq!(s, pending("102", "b201", 11));
    }

    #[test]
    fn test_nearest_door_tie_uses_registry_order() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let ctx = StepContext::new(&registry, &config);

        let c = contacts(&[("b301", 40), ("b201", 40)]);
        assert_eq!(ctx.nearest_door(&c).map(|d| d.as_str()), Some("b201"));
        let c = contacts(&[("b301", 39), ("b201", 40), ("b102", 1)]);
        assert_eq!(ctx.nearest_door(&c).map(|d| d.as_str()), Some("b301"));
        let c = contacts(&[("b102", 1), ("n4", 1)]);
        assert!(ctx.nearest_door(&c).is_none());
    }

    #[test]
    fn test_snapshot_missing_badge_is_structural() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let mut ctx = StepContext::new(&registry, &config);
        let badges: BTreeSet<EntityId> = [EntityId::new("n1")].into_iter().collect();
        let snapshot = StateSnapshot::initial(at(0), &badges);

        let mut moment = MomentContacts::new();
        moment.insert("n2".into(), ContactMap::new());
        let err = snapshot.advance(at(1), &moment, &mut ctx).unwrap_err();
        assert!(matches!(err, TraceError::StructuralViolation(_)));
    }

    fn interval(badge: &str, other: &str, offset: i64, duration: u32) -> ContactInterval {
        ContactInterval {
            badge: badge.into(),
            other: other.into(),
            start: at(offset),
            distance_in: 40,
            duration_s: duration,
        }
    }

    #[test]
    fn test_run_over_ledger() {
        let registry = sample_registry();
        let ledger = HistoryExpander::default()
            .expand(&[
                interval("n1", "b101", 0, 1),
                interval("n1", "b102", 5, 10),
                interval("n2", "n1", 0, 30),
            ])
            .unwrap();
        let history = OccupancyStateMachine::new(&registry, OccupancyConfig::default())
            .run(&ledger)
            .unwrap();
        assert_eq!(history.len(), ledger.len());

        let n1: EntityId = "n1".into();
        let n2: EntityId = "n2".into();
        assert_eq!(history.get(0).unwrap().get(&n1), Some(&pending("101", "b101", 0)));
        assert!(history.get(4).unwrap().get(&n1).unwrap().pending());
        assert_eq!(history.get(5).unwrap().get(&n1), Some(&inroom("101", "b101", 0)));
        // interior contact ends at 15; doortime is 0 so the timeout fires at 61
        assert!(history.get(60).unwrap().get(&n1).unwrap().inroom());
        assert_eq!(history.get(61).unwrap().get(&n1), Some(&BadgeState::Idle));
        assert!(history
            .snapshots()
            .iter()
            .all(|s| s.get(&n2) == Some(&BadgeState::Idle)));
        assert_eq!(history.stats().confirmations, 1);
        assert_eq!(history.stats().inroom_timeouts, 1);
    }

    #[test]
    fn test_badges_do_not_see_each_other_within_a_second() {
        let registry = sample_registry();
        let config = OccupancyConfig::default();
        let badges: BTreeSet<EntityId> =
            ["n1", "n2"].into_iter().map(EntityId::new).collect();
        let initial = StateSnapshot::initial(at(0), &badges);

        let mut moment = MomentContacts::new();
        moment.insert("n1".into(), contacts(&[("b101", 40)]));
        moment.insert("n2".into(), contacts(&[("b201", 40)]));

        let mut ctx = StepContext::new(&registry, &config);
        let next = initial.advance(at(1), &moment, &mut ctx).unwrap();
        assert_eq!(next.get(&"n1".into()), Some(&pending("101", "b101", 1)));
        assert_eq!(next.get(&"n2".into()), Some(&pending("102", "b201", 1)));
        // the source snapshot is untouched
        assert!(initial.iter().all(|(_, s)| *s == BadgeState::Idle));
    }
}
