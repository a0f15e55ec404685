//! Connection registry
//!
//! Tracks connections hosted by this process. Room cleanup on
//! deregistration is driven by [`crate::server::SignalServer`], which
//! owns both the registry and the backplane.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::client::{Connection, Resources};
use crate::message::ServerMessage;
use crate::types::{ClientId, RoomName};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with default resources.
    pub fn register(&self, id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Connection {
        let connection = Connection::new(id, sender);
        self.connections.insert(id, connection.clone());
        connection
    }

    /// Remove a connection, returning its last state.
    pub fn deregister(&self, id: ClientId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    /// Returns false when the id is not registered.
    pub fn set_resource_flags(&self, id: ClientId, resources: Resources) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut connection) => {
                connection.resources = resources;
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: ClientId) -> Option<Connection> {
        self.connections.get(&id).map(|c| c.clone())
    }

    /// Put the connection in `room`. Returns false when the id is no
    /// longer registered, in which case nothing changes.
    pub fn assign_room(&self, id: ClientId, room: RoomName) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut connection) => {
                connection.room = Some(room);
                true
            }
            None => false,
        }
    }

    /// Clear the connection's room, returning it.
    pub fn clear_room(&self, id: ClientId) -> Option<RoomName> {
        self.connections.get_mut(&id)?.room.take()
    }

    /// Local connections currently in `room`
    pub fn in_room(&self, room: &RoomName) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.is_in(room))
            .map(|c| c.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(n: usize) -> (ConnectionRegistry, Vec<ClientId>) {
        let registry = ConnectionRegistry::new();
        let ids = (0..n)
            .map(|_| {
                let (tx, _rx) = mpsc::channel(8);
                let id = ClientId::new();
                registry.register(id, tx);
                id
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_register_applies_defaults() {
        let (registry, ids) = registry_with(1);
        let connection = registry.lookup(ids[0]).unwrap();

        assert_eq!(connection.resources, Resources::default());
        assert!(connection.room.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup(ClientId::new()).is_none());
        assert!(registry.deregister(ClientId::new()).is_none());
    }

    #[test]
    fn test_set_resource_flags() {
        let (registry, ids) = registry_with(1);
        let flags = Resources {
            screen: true,
            video: false,
            audio: true,
        };

        assert!(registry.set_resource_flags(ids[0], flags));
        assert_eq!(registry.lookup(ids[0]).unwrap().resources, flags);
        assert!(!registry.set_resource_flags(ClientId::new(), flags));
    }

    #[test]
    fn test_assign_room_and_filter() {
        let (registry, ids) = registry_with(3);
        let r1 = RoomName::new("R1").unwrap();
        let r2 = RoomName::new("R2").unwrap();

        assert!(registry.assign_room(ids[0], r1.clone()));
        assert!(registry.assign_room(ids[1], r1.clone()));
        assert!(registry.assign_room(ids[2], r2.clone()));

        assert_eq!(registry.in_room(&r1).len(), 2);
        assert_eq!(registry.in_room(&r2).len(), 1);

        assert_eq!(registry.clear_room(ids[0]), Some(r1.clone()));
        assert_eq!(registry.clear_room(ids[0]), None);
        assert_eq!(registry.in_room(&r1).len(), 1);
    }

    #[test]
    fn test_assign_room_after_deregister() {
        let (registry, ids) = registry_with(1);
        registry.deregister(ids[0]);

        assert!(!registry.assign_room(ids[0], RoomName::new("R1").unwrap()));
        assert!(registry.in_room(&RoomName::new("R1").unwrap()).is_empty());
    }

    #[test]
    fn test_deregister() {
        let (registry, ids) = registry_with(2);
        let removed = registry.deregister(ids[0]).unwrap();

        assert_eq!(removed.id, ids[0]);
        assert!(registry.lookup(ids[0]).is_none());
        assert_eq!(registry.len(), 1);
    }
}
