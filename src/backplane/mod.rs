//! Distribution backplane
//!
//! Every process publishes room broadcasts and relayed messages as
//! [`Envelope`]s and receives every envelope published by any process,
//! delivering the ones addressed to connections it hosts. Room membership
//! lives on the backplane so member lists and counts span all processes.
//!
//! Two implementations:
//! - [`LocalBackplane`]: in-process bus for single-instance deployments and tests
//! - [`RedisBackplane`]: Redis hashes + pub/sub for horizontal scale-out

mod local;
mod redis;

pub use self::local::LocalBackplane;
pub use self::redis::RedisBackplane;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::client::Resources;
use crate::error::BackplaneError;
use crate::message::ServerMessage;
use crate::room::Members;
use crate::types::{ClientId, RoomName};

/// Buffered envelopes per subscriber before it starts lagging
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// Who an envelope is addressed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Target {
    /// Every member of a room
    Room(RoomName),
    /// A single connection, wherever it is hosted
    Client(ClientId),
}

/// A message in flight between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub target: Target,
    /// Connection to skip, typically the one that caused the broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<ClientId>,
    pub message: ServerMessage,
}

impl Envelope {
    pub fn to_room(room: RoomName, except: Option<ClientId>, message: ServerMessage) -> Self {
        Self {
            target: Target::Room(room),
            except,
            message,
        }
    }

    pub fn to_client(id: ClientId, message: ServerMessage) -> Self {
        Self {
            target: Target::Client(id),
            except: None,
            message,
        }
    }
}

/// Shared pub/sub and membership store
///
/// The room coordinator and message relay only ever talk to this trait.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publish an envelope to every process.
    async fn publish(&self, envelope: Envelope) -> Result<(), BackplaneError>;

    /// Receive every envelope published by any process.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;

    /// Add a member to a room, or update its resources.
    async fn add_member(
        &self,
        room: &RoomName,
        id: ClientId,
        resources: Resources,
    ) -> Result<(), BackplaneError>;

    async fn remove_member(&self, room: &RoomName, id: ClientId) -> Result<(), BackplaneError>;

    /// All members of a room. Unknown rooms are empty.
    async fn members(&self, room: &RoomName) -> Result<Members, BackplaneError>;

    async fn count(&self, room: &RoomName) -> Result<usize, BackplaneError>;
}
