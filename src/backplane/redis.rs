//! Redis backplane
//!
//! # Key Patterns
//!
//! - `signal:room:{name}` - HASH of member id -> `{"node", "resources"}` JSON.
//!   Redis drops the key when the last field is removed, so empty rooms leave
//!   nothing behind.
//! - `signal:node:{uuid}` - heartbeat of one process, refreshed every
//!   [`HEARTBEAT_INTERVAL`] and expiring after [`HEARTBEAT_TTL_SECS`].
//! - `signal:events` - pub/sub channel carrying JSON [`Envelope`]s.
//!
//! # Liveness
//!
//! Every member entry names the process hosting the connection. A process
//! that dies stops refreshing its heartbeat, and once that key expires its
//! entries are skipped and deleted by the next membership read on any
//! process.
//!
//! # Connection Pattern
//!
//! Commands go through a `MultiplexedConnection`, which is cheap to clone and
//! safe to use concurrently. A dedicated pub/sub connection feeds a forwarding
//! task that decodes envelopes into a local broadcast channel.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Backplane, Envelope, EVENT_BUFFER_SIZE};
use crate::client::Resources;
use crate::config::RedisConfig;
use crate::error::BackplaneError;
use crate::room::Members;
use crate::types::{ClientId, RoomName};

/// Pub/sub channel shared by every process
pub const EVENTS_CHANNEL: &str = "signal:events";

/// Lifetime of a process heartbeat key
pub const HEARTBEAT_TTL_SECS: u64 = 30;

/// How often a live process refreshes its heartbeat
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

fn room_key(room: &RoomName) -> String {
    format!("signal:room:{room}")
}

fn node_key(node: Uuid) -> String {
    format!("signal:node:{node}")
}

/// Stored value of one room member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct MemberEntry {
    node: Uuid,
    resources: Resources,
}

/// Split a room hash into members hosted by live nodes and the fields to
/// delete: entries of dead nodes and entries that do not decode.
fn split_live(raw: HashMap<String, String>, live: &HashSet<Uuid>) -> (Members, Vec<String>) {
    let mut members = Members::new();
    let mut stale = Vec::new();

    for (field, value) in raw {
        let (Ok(id), Ok(entry)) = (
            field.parse::<ClientId>(),
            serde_json::from_str::<MemberEntry>(&value),
        ) else {
            debug!(field = %field, "Dropping malformed member entry");
            stale.push(field);
            continue;
        };
        if live.contains(&entry.node) {
            members.insert(id, entry.resources);
        } else {
            stale.push(field);
        }
    }
    (members, stale)
}

/// Redis-backed backplane for multi-process deployments
#[derive(Clone)]
pub struct RedisBackplane {
    connection: MultiplexedConnection,
    events: broadcast::Sender<Envelope>,
    /// Identifies this process in member entries
    node: Uuid,
}

impl RedisBackplane {
    /// Connect, subscribe to the events channel and start forwarding.
    ///
    /// # Errors
    ///
    /// Returns `BackplaneError::Redis` if either connection fails.
    pub async fn connect(config: &RedisConfig) -> Result<Self, BackplaneError> {
        // Never log the URL, it may carry the password
        let client = Client::open(config.url()).map_err(|e| {
            error!(error = %e, "Failed to open Redis client");
            BackplaneError::Redis(e)
        })?;

        let mut connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            error!(error = %e, host = %config.host, port = config.port, "Failed to connect to Redis");
            BackplaneError::Redis(e)
        })?;

        let node = Uuid::new_v4();
        let _: () = connection
            .set_ex(node_key(node), 1, HEARTBEAT_TTL_SECS)
            .await?;
        tokio::spawn(heartbeat(connection.clone(), node));

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(EVENTS_CHANNEL).await?;

        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let forward = events.clone();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Unreadable backplane payload");
                        continue;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => {
                        let _ = forward.send(envelope);
                    }
                    Err(e) => warn!(error = %e, "Undecodable backplane envelope"),
                }
            }
            error!("Redis subscription closed, cross-process events stopped");
        });

        info!(host = %config.host, port = config.port, node = %node, "Connected to Redis backplane");

        Ok(Self {
            connection,
            events,
            node,
        })
    }
}

/// Keep this process's heartbeat key from expiring
async fn heartbeat(mut connection: MultiplexedConnection, node: Uuid) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        let refreshed: Result<(), _> = connection
            .set_ex(node_key(node), 1, HEARTBEAT_TTL_SECS)
            .await;
        if let Err(e) = refreshed {
            warn!(error = %e, node = %node, "Failed to refresh heartbeat");
        }
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, envelope: Envelope) -> Result<(), BackplaneError> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(&envelope)?;
        let _: () = conn.publish(EVENTS_CHANNEL, payload).await?;
        Ok(())
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
        let mut conn = self.connection.clone();
        let value = serde_json::to_string(&MemberEntry {
            node: self.node,
            resources,
        })?;
        let _: () = conn.hset(room_key(room), id.to_string(), value).await?;
        Ok(())
    }

    async fn remove_member(&self, room: &RoomName, id: ClientId) -> Result<(), BackplaneError> {
        let mut conn = self.connection.clone();
        let _: () = conn.hdel(room_key(room), id.to_string()).await?;
        Ok(())
    }

    async fn members(&self, room: &RoomName) -> Result<Members, BackplaneError> {
        let mut conn = self.connection.clone();
        let key = room_key(room);
        let raw: HashMap<String, String> = conn.hgetall(&key).await?;

        let nodes: HashSet<Uuid> = raw
            .values()
            .filter_map(|value| serde_json::from_str::<MemberEntry>(value).ok())
            .map(|entry| entry.node)
            .collect();

        // Our own entries stay valid even if a heartbeat refresh was missed
        let mut live = HashSet::from([self.node]);
        for node in nodes {
            if node != self.node {
                let alive: bool = conn.exists(node_key(node)).await?;
                if alive {
                    live.insert(node);
                }
            }
        }

        let (members, stale) = split_live(raw, &live);
        if !stale.is_empty() {
            info!(room = %room, count = stale.len(), "Reaping members of dead processes");
            let _: () = conn.hdel(&key, stale).await?;
        }
        Ok(members)
    }

    /// Derived from [`Backplane::members`] so dead processes are never counted.
    async fn count(&self, room: &RoomName) -> Result<usize, BackplaneError> {
        Ok(self.members(room).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node: Uuid) -> String {
        serde_json::to_string(&MemberEntry {
            node,
            resources: Resources::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_keys() {
        assert_eq!(room_key(&RoomName::new("R1").unwrap()), "signal:room:R1");

        let node = Uuid::new_v4();
        assert_eq!(node_key(node), format!("signal:node:{node}"));
    }

    #[test]
    fn test_member_entry_format() {
        let node = Uuid::new_v4();
        let value: serde_json::Value = serde_json::from_str(&entry(node)).unwrap();

        assert_eq!(value["node"], node.to_string());
        assert_eq!(value["resources"]["video"], true);
    }

    #[test]
    fn test_split_live_drops_dead_nodes() {
        let alive = Uuid::new_v4();
        let dead = Uuid::new_v4();
        let (c1, c2) = (ClientId::new(), ClientId::new());

        let raw = HashMap::from([
            (c1.to_string(), entry(alive)),
            (c2.to_string(), entry(dead)),
            ("garbage".to_string(), entry(alive)),
            (ClientId::new().to_string(), "{\"video\":true}".to_string()),
        ]);
        let (members, stale) = split_live(raw, &HashSet::from([alive]));

        assert_eq!(members.keys().copied().collect::<Vec<_>>(), vec![c1]);
        assert_eq!(stale.len(), 3);
        assert!(stale.contains(&c2.to_string()));
        assert!(stale.contains(&"garbage".to_string()));
    }

    #[test]
    fn test_split_live_empty_room() {
        let (members, stale) = split_live(HashMap::new(), &HashSet::new());
        assert!(members.is_empty());
        assert!(stale.is_empty());
    }
}
