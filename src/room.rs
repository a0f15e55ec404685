//! Room membership tables and reply shapes
//!
//! A room exists only while it has members; removing the last member
//! drops it from the table.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::client::Resources;
use crate::types::{ClientId, RoomName};

/// Members of one room with their advertised resources
pub type Members = BTreeMap<ClientId, Resources>;

/// Reply to `getClients`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomMembers {
    pub clients: Members,
}

/// Reply to `join`: the joiner's id plus every member, joiner included
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub you: ClientId,
    pub clients: Members,
}

/// Room name → members, as held by the in-process bus
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomName, Members>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a member. Creates the room on first join.
    pub fn insert(&mut self, room: RoomName, id: ClientId, resources: Resources) {
        self.rooms.entry(room).or_default().insert(id, resources);
    }

    /// Remove a member. Returns true if the room was deleted (no members left).
    pub fn remove(&mut self, room: &RoomName, id: ClientId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(room);
            true
        } else {
            false
        }
    }

    pub fn members(&self, room: &RoomName) -> Members {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn count(&self, room: &RoomName) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    #[cfg(test)]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomName {
        RoomName::new(name).unwrap()
    }

    #[test]
    fn test_room_created_on_first_insert() {
        let mut table = RoomTable::new();
        assert_eq!(table.room_count(), 0);

        table.insert(room("R1"), ClientId::new(), Resources::default());

        assert_eq!(table.room_count(), 1);
        assert_eq!(table.count(&room("R1")), 1);
    }

    #[test]
    fn test_room_deleted_when_last_member_leaves() {
        let mut table = RoomTable::new();
        let a = ClientId::new();
        let b = ClientId::new();
        table.insert(room("R1"), a, Resources::default());
        table.insert(room("R1"), b, Resources::default());

        assert!(!table.remove(&room("R1"), a));
        assert_eq!(table.count(&room("R1")), 1);

        assert!(table.remove(&room("R1"), b));
        assert_eq!(table.room_count(), 0);
    }

    #[test]
    fn test_insert_updates_resources() {
        let mut table = RoomTable::new();
        let a = ClientId::new();
        table.insert(room("R1"), a, Resources::default());

        let sharing = Resources {
            screen: true,
            ..Resources::default()
        };
        table.insert(room("R1"), a, sharing);

        assert_eq!(table.count(&room("R1")), 1);
        assert_eq!(table.members(&room("R1"))[&a], sharing);
    }

    #[test]
    fn test_unknown_room_is_empty() {
        let mut table = RoomTable::new();
        assert!(table.members(&room("nope")).is_empty());
        assert_eq!(table.count(&room("nope")), 0);
        assert!(!table.remove(&room("nope"), ClientId::new()));
    }

    #[test]
    fn test_snapshot_serialization() {
        let you = ClientId::new();
        let mut clients = Members::new();
        clients.insert(you, Resources::default());
        let snapshot = RoomSnapshot { you, clients };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["you"], you.to_string());
        assert_eq!(json["clients"][you.to_string()]["video"], true);
    }
}
