//! In-process backplane actor
//!
//! A single `Bus` task owns the room table and fans envelopes out over a
//! broadcast channel. Handles talk to it through an mpsc command channel,
//! so no locks are needed. Cloned handles share the same bus, which lets
//! several `SignalServer`s in one process stand in for separate
//! processes.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use super::{Backplane, Envelope, EVENT_BUFFER_SIZE};
use crate::client::Resources;
use crate::error::BackplaneError;
use crate::room::{Members, RoomTable};
use crate::types::{ClientId, RoomName};

/// Channel buffer size for bus commands
const COMMAND_BUFFER_SIZE: usize = 256;

/// Commands sent from handles to the bus actor
#[derive(Debug)]
enum BusCommand {
    Publish {
        envelope: Envelope,
    },
    AddMember {
        room: RoomName,
        id: ClientId,
        resources: Resources,
        reply: oneshot::Sender<()>,
    },
    RemoveMember {
        room: RoomName,
        id: ClientId,
        reply: oneshot::Sender<()>,
    },
    Members {
        room: RoomName,
        reply: oneshot::Sender<Members>,
    },
    Count {
        room: RoomName,
        reply: oneshot::Sender<usize>,
    },
}

/// The bus actor
struct Bus {
    rooms: RoomTable,
    events: broadcast::Sender<Envelope>,
    receiver: mpsc::Receiver<BusCommand>,
}

impl Bus {
    /// Run until every handle is dropped
    async fn run(mut self) {
        debug!("Local backplane started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Local backplane shutting down");
    }

    fn handle_command(&mut self, cmd: BusCommand) {
        match cmd {
            BusCommand::Publish { envelope } => {
                // No subscribers is fine
                let _ = self.events.send(envelope);
            }
            BusCommand::AddMember {
                room,
                id,
                resources,
                reply,
            } => {
                self.rooms.insert(room, id, resources);
                let _ = reply.send(());
            }
            BusCommand::RemoveMember { room, id, reply } => {
                if self.rooms.remove(&room, id) {
                    debug!("Room {} deleted (empty)", room);
                }
                let _ = reply.send(());
            }
            BusCommand::Members { room, reply } => {
                let _ = reply.send(self.rooms.members(&room));
            }
            BusCommand::Count { room, reply } => {
                let _ = reply.send(self.rooms.count(&room));
            }
        }
    }
}

/// Handle to an in-process bus
#[derive(Debug, Clone)]
pub struct LocalBackplane {
    commands: mpsc::Sender<BusCommand>,
    events: broadcast::Sender<Envelope>,
}

impl LocalBackplane {
    /// Start a bus actor on the current runtime
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        let bus = Bus {
            rooms: RoomTable::new(),
            events: events.clone(),
            receiver,
        };
        tokio::spawn(bus.run());

        Self { commands, events }
    }

    async fn send(&self, cmd: BusCommand) -> Result<(), BackplaneError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| BackplaneError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BusCommand,
    ) -> Result<T, BackplaneError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| BackplaneError::Closed)
    }
}

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, envelope: Envelope) -> Result<(), BackplaneError> {
        self.send(BusCommand::Publish { envelope }).await
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    async fn add_member(
        &self,
        room: &RoomName,
        id: ClientId,
        resources: Resources,
    ) -> Result<(), BackplaneError> {
        let room = room.clone();
        self.request(|reply| BusCommand::AddMember {
            room,
            id,
            resources,
            reply,
        })
        .await
    }

    async fn remove_member(&self, room: &RoomName, id: ClientId) -> Result<(), BackplaneError> {
        let room = room.clone();
        self.request(|reply| BusCommand::RemoveMember { room, id, reply })
            .await
    }

    async fn members(&self, room: &RoomName) -> Result<Members, BackplaneError> {
        let room = room.clone();
        self.request(|reply| BusCommand::Members { room, reply }).await
    }

    async fn count(&self, room: &RoomName) -> Result<usize, BackplaneError> {
        let room = room.clone();
        self.request(|reply| BusCommand::Count { room, reply }).await
    }
}
