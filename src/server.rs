//! SignalServer service
//!
//! One instance per process, shared by every connection handler through an
//! `Arc`. Owns the local connection registry and talks to other processes
//! only through the [`Backplane`]: room broadcasts and relayed messages are
//! published as envelopes, and a delivery task hands each received envelope
//! to the local connections it addresses.
//!
//! Room membership follows `NoRoom -> InRoom(a) -> NoRoom` or
//! `InRoom(a) -> InRoom(b)`; joining always vacates the current room first.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::backplane::{Backplane, Envelope, Target};
use crate::client::{Connection, Resources};
use crate::config::Config;
use crate::credentials;
use crate::error::{BackplaneError, CreateError, SendError};
use crate::message::{Ack, ClientEvent, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::room::{Members, RoomMembers, RoomSnapshot};
use crate::types::{ClientId, RoomName};

/// Feed type broadcast when a connection stops sharing its screen
pub const SCREEN_FEED: &str = "screen";

pub struct SignalServer {
    registry: ConnectionRegistry,
    backplane: Arc<dyn Backplane>,
    config: Config,
}

impl SignalServer {
    /// Create the server and start delivering backplane events.
    ///
    /// Subscribes before returning, so nothing published after this call
    /// is missed.
    pub fn start(config: Config, backplane: Arc<dyn Backplane>) -> Arc<Self> {
        let server = Arc::new(Self {
            registry: ConnectionRegistry::new(),
            backplane,
            config,
        });

        let events = server.backplane.subscribe();
        tokio::spawn(Arc::clone(&server).deliver_events(events));

        server
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Delivery loop: hand every envelope to the local connections it addresses
    async fn deliver_events(self: Arc<Self>, mut events: broadcast::Receiver<Envelope>) {
        info!("SignalServer delivery started");

        loop {
            match events.recv().await {
                Ok(envelope) => self.deliver(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Delivery lagged, {} backplane events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("SignalServer delivery stopped");
    }

    /// Never waits on a recipient: a connection whose outbound buffer is
    /// full loses this message, the others still get it.
    fn deliver(&self, envelope: Envelope) {
        let Envelope {
            target,
            except,
            message,
        } = envelope;

        let recipients = match &target {
            Target::Client(id) => self.registry.lookup(*id).into_iter().collect(),
            Target::Room(room) => self.registry.in_room(room),
        };

        for connection in recipients {
            if Some(connection.id) == except {
                continue;
            }
            match connection.try_send(message.clone()) {
                Ok(()) => {}
                Err(SendError::Full) => {
                    warn!("Outbound buffer of {} full, dropping {:?} delivery", connection.id, target);
                }
                Err(SendError::ChannelClosed) => {
                    debug!("Dropping {:?} delivery to closed connection {}", target, connection.id);
                }
            }
        }
    }

    async fn publish(&self, envelope: Envelope) {
        if let Err(e) = self.backplane.publish(envelope).await {
            error!("Failed to publish to backplane: {}", e);
        }
    }

    /// Register a new connection and send it STUN servers and TURN credentials.
    pub async fn connect(
        &self,
        id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
        origin: Option<&str>,
    ) -> Connection {
        let connection = self.registry.register(id, sender);
        info!("Client {} connected (origin: {:?})", id, origin);

        if let Err(e) = connection
            .send(ServerMessage::Stunservers(self.config.stunservers.clone()))
            .await
        {
            debug!("Failed to send STUN servers to {}: {}", id, e);
        }

        let credentials = credentials::issue(
            origin,
            &self.config.turnservers,
            &self.config.turnorigins,
        );
        if let Err(e) = connection
            .send(ServerMessage::Turnservers(credentials))
            .await
        {
            debug!("Failed to send TURN credentials to {}: {}", id, e);
        }

        debug!("Total local clients: {}", self.registry.len());
        connection
    }

    /// Drop the connection and leave its room.
    ///
    /// Deregisters first, so a `join` still in flight for this id fails its
    /// room assignment and undoes its own membership.
    pub async fn disconnect(&self, id: ClientId) {
        let Some(connection) = self.registry.deregister(id) else {
            return;
        };
        if let Some(room) = connection.room {
            self.vacate(id, room).await;
        }
        info!("Client {} disconnected", id);
        debug!("Total local clients: {}", self.registry.len());
    }

    /// Dispatch one inbound event, replying through `ack`.
    pub async fn handle_event(&self, id: ClientId, event: ClientEvent, ack: Ack) {
        match event {
            ClientEvent::Message { to, payload } => {
                self.route(id, &to, Some(payload)).await;
            }
            ClientEvent::Join(room) => {
                if let Some(snapshot) = self.join(id, room).await {
                    ack.reply(vec![Value::Null, to_json(&snapshot)]).await;
                }
            }
            ClientEvent::Create(requested) => match self.create_unique(id, requested).await {
                Ok(room) => {
                    ack.reply(vec![Value::Null, Value::String(room.to_string())])
                        .await;
                }
                Err(e) => ack.reply(vec![Value::String(e.to_string())]).await,
            },
            ClientEvent::GetClients(room) => match self.list_members(&room).await {
                Ok(members) => ack.reply(vec![Value::Null, to_json(&members)]).await,
                Err(e) => {
                    error!("Failed to list members of {}: {}", room, e);
                    ack.reply(vec![Value::String(e.to_string()), Value::Null])
                        .await;
                }
            },
            ClientEvent::GetClientCount(room) => match self.count_members(&room).await {
                Ok(count) => ack.reply(vec![Value::from(count)]).await,
                Err(e) => error!("Failed to count members of {}: {}", room, e),
            },
            ClientEvent::GetMyId => {
                ack.reply(vec![Value::String(id.to_string())]).await;
            }
            ClientEvent::Leave => self.leave(id).await,
            ClientEvent::ShareScreen => self.set_screen_sharing(id, true).await,
            ClientEvent::UnshareScreen => self.set_screen_sharing(id, false).await,
        }
    }

    /// Join `room`, vacating the current room first.
    ///
    /// Returns the room as seen at join time, joiner included, or `None`
    /// for an unknown or disconnected connection. With a capacity limit
    /// set, a joiner that pushes the member count past it is evicted again
    /// right after the join. The check is not atomic across processes, so
    /// concurrent joins may overshoot briefly.
    pub async fn join(&self, id: ClientId, room: RoomName) -> Option<RoomSnapshot> {
        let connection = self.registry.lookup(id)?;

        self.remove_feed(id, None).await;

        let mut clients = self.backplane.members(&room).await.unwrap_or_else(|e| {
            error!("Failed to list members of {}: {}", room, e);
            Members::new()
        });
        clients.insert(id, connection.resources);

        if let Err(e) = self
            .backplane
            .add_member(&room, id, connection.resources)
            .await
        {
            error!("Failed to add {} to room {}: {}", id, room, e);
        }
        if !self.registry.assign_room(id, room.clone()) {
            debug!("Client {} disconnected while joining {}", id, room);
            if let Err(e) = self.backplane.remove_member(&room, id).await {
                error!("Failed to remove {} from room {}: {}", id, room, e);
            }
            return None;
        }
        info!("Client {} joined room {}", id, room);

        self.enforce_capacity(id, &room).await;

        Some(RoomSnapshot { you: id, clients })
    }

    async fn enforce_capacity(&self, id: ClientId, room: &RoomName) {
        let max_clients = self.config.rooms.max_clients;
        if max_clients == 0 {
            return;
        }

        match self.backplane.count(room).await {
            Ok(count) if count > max_clients => {
                warn!(
                    "Room {} over capacity ({} > {}), evicting {}",
                    room, count, max_clients, id
                );
                self.remove_feed(id, None).await;
            }
            Ok(_) => {}
            Err(e) => error!("Failed to count members of {}: {}", room, e),
        }
    }

    /// Leave the current room, if any.
    pub async fn leave(&self, id: ClientId) {
        self.remove_feed(id, None).await;
    }

    /// Broadcast `remove` for this connection to the rest of its room.
    ///
    /// Without a feed type the connection also leaves the room; a typed
    /// removal (e.g. `screen`) only withdraws that feed.
    async fn remove_feed(&self, id: ClientId, kind: Option<&str>) {
        let Some(kind) = kind else {
            if let Some(room) = self.registry.clear_room(id) {
                self.vacate(id, room).await;
            }
            return;
        };
        let Some(room) = self.registry.lookup(id).and_then(|c| c.room) else {
            return;
        };

        self.publish(Envelope::to_room(
            room,
            Some(id),
            ServerMessage::Remove {
                id,
                kind: Some(kind.to_string()),
            },
        ))
        .await;
    }

    /// Tell the rest of `room` this connection is gone and drop its membership.
    async fn vacate(&self, id: ClientId, room: RoomName) {
        self.publish(Envelope::to_room(
            room.clone(),
            Some(id),
            ServerMessage::Remove { id, kind: None },
        ))
        .await;

        if let Err(e) = self.backplane.remove_member(&room, id).await {
            error!("Failed to remove {} from room {}: {}", id, room, e);
        }
        info!("Client {} left room {}", id, room);
    }

    /// Join `requested`, or a freshly generated room, if it has no members.
    pub async fn create_unique(
        &self,
        id: ClientId,
        requested: Option<RoomName>,
    ) -> Result<RoomName, CreateError> {
        let room = requested.unwrap_or_else(RoomName::generate);

        let taken = match self.backplane.count(&room).await {
            Ok(count) => count > 0,
            Err(e) => {
                error!("Failed to check room {}: {}", room, e);
                false
            }
        };
        if taken {
            debug!("Client {} asked for taken room {}", id, room);
            return Err(CreateError::Taken);
        }

        self.join(id, room.clone()).await;
        Ok(room)
    }

    /// Every current member of `room` with its resources.
    pub async fn list_members(&self, room: &RoomName) -> Result<RoomMembers, BackplaneError> {
        let clients = self.backplane.members(room).await?;
        Ok(RoomMembers { clients })
    }

    pub async fn count_members(&self, room: &RoomName) -> Result<usize, BackplaneError> {
        self.backplane.count(room).await
    }

    /// Toggle the screen flag. Stopping also withdraws the screen feed from the room.
    pub async fn set_screen_sharing(&self, id: ClientId, sharing: bool) {
        let Some(connection) = self.registry.lookup(id) else {
            return;
        };

        let resources = Resources {
            screen: sharing,
            ..connection.resources
        };
        self.registry.set_resource_flags(id, resources);

        if let Some(room) = &connection.room {
            if let Err(e) = self.backplane.add_member(room, id, resources).await {
                error!("Failed to update resources of {} in {}: {}", id, room, e);
            }
            // Left or disconnected meanwhile: don't resurrect the membership
            let still_member = self.registry.lookup(id).is_some_and(|c| c.is_in(room));
            if !still_member {
                if let Err(e) = self.backplane.remove_member(room, id).await {
                    error!("Failed to remove {} from room {}: {}", id, room, e);
                }
                return;
            }
        }

        if !sharing {
            self.remove_feed(id, Some(SCREEN_FEED)).await;
        }
    }

    /// Relay an opaque payload to `to`, stamped with `from`.
    ///
    /// Best effort: a missing payload or an id that resolves to no live
    /// connection on any process is dropped silently.
    pub async fn route(&self, from: ClientId, to: &str, payload: Option<Map<String, Value>>) {
        let Some(mut payload) = payload else {
            return;
        };
        let Ok(to) = to.parse::<ClientId>() else {
            debug!("Dropping message from {} to unknown id {:?}", from, to);
            return;
        };

        payload.insert("from".to_string(), Value::String(from.to_string()));
        self.publish(Envelope::to_client(to, ServerMessage::Message(payload)))
            .await;
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("Failed to serialize reply: {}", e);
        Value::Null
    })
}
