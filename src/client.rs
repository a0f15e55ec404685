//! Connection struct definition
//!
//! Represents a live connection hosted by this process, with its
//! negotiable resource flags, current room and outbound channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{ClientId, RoomName};

/// Media resources a connection advertises to its room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub screen: bool,
    pub video: bool,
    pub audio: bool,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            screen: false,
            video: true,
            audio: false,
        }
    }
}

/// Live connection record
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ClientId,
    pub resources: Resources,
    /// At most one room at a time
    pub room: Option<RoomName>,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Connection {
    /// Create a new connection with default resources and no room
    pub fn new(id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            resources: Resources::default(),
            room: None,
            sender,
        }
    }

    /// Send a message to this connection
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a message without waiting for buffer space
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn is_in(&self, room: &RoomName) -> bool {
        self.room.as_ref() == Some(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resources() {
        let resources = Resources::default();
        assert!(!resources.screen);
        assert!(resources.video);
        assert!(!resources.audio);
    }

    #[tokio::test]
    async fn test_connection_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let connection = Connection::new(ClientId::new(), tx);

        assert!(connection.room.is_none());
        assert_eq!(connection.resources, Resources::default());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(32);
        let connection = Connection::new(ClientId::new(), tx);
        drop(rx);

        let result = connection
            .send(ServerMessage::Stunservers(Vec::new()))
            .await;
        assert!(matches!(result, Err(SendError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_buffer() {
        let (tx, mut rx) = mpsc::channel(1);
        let connection = Connection::new(ClientId::new(), tx);

        assert!(connection.try_send(ServerMessage::Stunservers(Vec::new())).is_ok());
        let result = connection.try_send(ServerMessage::Stunservers(Vec::new()));
        assert!(matches!(result, Err(SendError::Full)));

        rx.recv().await;
        drop(rx);
        let result = connection.try_send(ServerMessage::Stunservers(Vec::new()));
        assert!(matches!(result, Err(SendError::ChannelClosed)));
    }
}
