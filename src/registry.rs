//! Anchor registry
//!
//! Read-only lookup of fixed anchors: which room each belongs to and what it
//! is mounted on. The registry is produced from the facility spreadsheet by an
//! external tool and consumed here as a JSON array in spreadsheet order.

use crate::error::TraceError;
use crate::types::EntityId;
use indexmap::IndexMap;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// What an anchor is mounted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorRole {
    Door,
    Computer,
    Vitals,
    Sink,
}

impl AnchorRole {
    pub fn is_door(&self) -> bool {
        matches!(self, AnchorRole::Door)
    }
}

/// Room identifier as written in the facility spreadsheet.
///
/// Registry exports carry room numbers either as JSON integers or as strings;
/// both decode to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        RoomId(s.to_string())
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RoomIdVisitor)
    }
}

struct RoomIdVisitor;

impl<'de> Visitor<'de> for RoomIdVisitor {
    type Value = RoomId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a room number or name")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RoomId, E> {
        Ok(RoomId(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RoomId, E> {
        Ok(RoomId(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RoomId, E> {
        Ok(RoomId(v.to_string()))
    }
}

/// One registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub id: EntityId,
    pub room: RoomId,
    pub role: AnchorRole,
}

/// Anchor id to (room, role), preserving registry order
#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    anchors: IndexMap<EntityId, (RoomId, AnchorRole)>,
}

impl AnchorRegistry {
    /// Build from entries; a repeated id keeps its first position and last value
    pub fn from_entries(entries: impl IntoIterator<Item = AnchorEntry>) -> Self {
        let mut anchors = IndexMap::new();
        for entry in entries {
            anchors.insert(entry.id, (entry.room, entry.role));
        }
        Self { anchors }
    }

    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        let entries: Vec<AnchorEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn is_registered(&self, id: &EntityId) -> bool {
        self.anchors.contains_key(id)
    }

    pub fn room_of(&self, id: &EntityId) -> Option<&RoomId> {
        self.anchors.get(id).map(|(room, _)| room)
    }

    /// Position of an anchor in registry order
    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.anchors.get_index_of(id)
    }

    /// Room guarded by a door anchor; fails for anything but a registered door
    pub fn room_of_door(&self, id: &EntityId) -> Result<&RoomId, TraceError> {
        match self.anchors.get(id) {
            Some((room, AnchorRole::Door)) => Ok(room),
            _ => Err(TraceError::NotADoor(id.to_string())),
        }
    }

    pub fn is_door(&self, id: &EntityId) -> bool {
        matches!(self.anchors.get(id), Some((_, AnchorRole::Door)))
    }

    /// Non-door anchors of a room
    pub fn interior_anchors_of(&self, room: &RoomId) -> BTreeSet<EntityId> {
        self.anchors
            .iter()
            .filter(|(_, (r, role))| r == room && !role.is_door())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `id` is a non-door anchor of `room`
    pub fn is_interior_of(&self, id: &EntityId, room: &RoomId) -> bool {
        matches!(self.anchors.get(id), Some((r, role)) if r == room && !role.is_door())
    }

    /// Every anchor of a room, doors included, in registry order
    pub fn anchors_of(&self, room: &RoomId) -> Vec<EntityId> {
        self.anchors
            .iter()
            .filter(|(_, (r, _))| r == room)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn rooms(&self) -> BTreeSet<RoomId> {
        self.anchors.values().map(|(room, _)| room.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_registry() -> AnchorRegistry {
        AnchorRegistry::from_json(
            r#"[
                {"id": "b101", "room": "101", "role": "door"},
                {"id": "b102", "room": "101", "role": "vitals"},
                {"id": "b103", "room": "101", "role": "sink"},
                {"id": "b201", "room": "102", "role": "door"},
                {"id": "b202", "room": "102", "role": "computer"},
                {"id": "b301", "room": "103", "role": "door"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_room_of_door() {
        let registry = sample_registry();
        assert_eq!(registry.room_of_door(&"b101".into()).unwrap().as_str(), "101");
        assert!(matches!(
            registry.room_of_door(&"b102".into()),
            Err(TraceError::NotADoor(_))
        ));
        assert!(registry.room_of_door(&"b999".into()).is_err());
    }

    #[test]
    fn test_interior_anchors() {
        let registry = sample_registry();
        let interior = registry.interior_anchors_of(&"101".into());
        let names: Vec<&str> = interior.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, vec!["b102", "b103"]);
        assert!(registry.interior_anchors_of(&"103".into()).is_empty());
        assert!(registry.is_interior_of(&"b202".into(), &"102".into()));
        assert!(!registry.is_interior_of(&"b201".into(), &"102".into()));
    }

    #[test]
    fn test_registry_order() {
        let registry = sample_registry();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.position(&"b101".into()), Some(0));
        assert_eq!(registry.position(&"b301".into()), Some(5));
        assert!(!registry.is_registered(&"b999".into()));
        assert_eq!(registry.rooms().len(), 3);
        assert_eq!(registry.anchors_of(&"101".into()).len(), 3);
    }

    #[test]
    fn test_numeric_rooms_match_string_rooms() {
        let registry = AnchorRegistry::from_json(
            r#"[
                {"id": "b101", "room": 101, "role": "door"},
                {"id": "b102", "room": "101", "role": "vitals"}
            ]"#,
        )
        .unwrap();
        assert_eq!(registry.room_of_door(&"b101".into()).unwrap().as_str(), "101");
        assert!(registry.is_interior_of(&"b102".into(), &"101".into()));
        assert_eq!(registry.rooms().len(), 1);

        let room: RoomId = serde_json::from_str("203").unwrap();
        assert_eq!(serde_json::to_string(&room).unwrap(), r#""203""#);
        assert!(serde_json::from_str::<RoomId>("1.5").is_err());
    }

    #[test]
    fn test_rejects_unknown_role() {
        let json = r#"[{"id": "b1", "room": "1", "role": "window"}]"#;
        assert!(AnchorRegistry::from_json(json).is_err());
    }
}
