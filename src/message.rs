//! Message protocol definitions
//!
//! Inbound frames are `{"event", "data", "ack"}` objects. Known events are
//! parsed into [`ClientEvent`]; anything malformed is dropped without a
//! reply. Outbound traffic is a Serde adjacently-tagged [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::credentials::Credential;
use crate::types::{ClientId, RoomName};

/// Raw inbound frame
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Callback id; absent when the client passed no callback
    #[serde(default)]
    pub ack: Option<u64>,
}

/// Client → Server event
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Relay an opaque payload to another connection
    Message { to: String, payload: Map<String, Value> },
    /// Join a room, leaving any current one
    Join(RoomName),
    /// Create a room, optionally with a requested name
    Create(Option<RoomName>),
    /// List room members
    GetClients(RoomName),
    /// Count room members
    GetClientCount(RoomName),
    /// Ask for own connection id
    GetMyId,
    /// Leave the current room
    Leave,
    /// Start sharing a screen
    ShareScreen,
    /// Stop sharing a screen
    UnshareScreen,
}

impl ClientEvent {
    /// Parse a frame into a known event.
    ///
    /// Returns `None` for unknown events and wrongly typed payloads.
    pub fn parse(frame: Frame) -> Option<Self> {
        let Frame { event, data, .. } = frame;
        let event = match event.as_str() {
            "message" => {
                let Value::Object(payload) = data else {
                    return None;
                };
                let to = payload.get("to")?.as_str()?.to_string();
                ClientEvent::Message { to, payload }
            }
            "join" => ClientEvent::Join(room_name(data)?),
            "create" => ClientEvent::Create(room_name(data)),
            "getClients" => ClientEvent::GetClients(room_name(data)?),
            "getClientCount" => ClientEvent::GetClientCount(room_name(data)?),
            "getMyId" => ClientEvent::GetMyId,
            "leave" => ClientEvent::Leave,
            "shareScreen" => ClientEvent::ShareScreen,
            "unshareScreen" => ClientEvent::UnshareScreen,
            _ => return None,
        };
        Some(event)
    }
}

fn room_name(data: Value) -> Option<RoomName> {
    match data {
        Value::String(name) => RoomName::new(name),
        _ => None,
    }
}

/// Server → Client message
///
/// Serialized as `{"event": ..., "data": ...}`. Also the payload type
/// carried across the backplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Relayed payload, stamped with `from`
    Message(Map<String, Value>),
    /// A member left the room (no type) or stopped a feed (typed)
    Remove {
        id: ClientId,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// STUN servers, sent on connect
    Stunservers(Vec<Value>),
    /// TURN credentials, sent on connect
    Turnservers(Vec<Credential>),
    /// Reply to a client callback
    Ack { ack: u64, args: Vec<Value> },
}

/// Optional client callback
///
/// Bound once at the transport boundary; replying to a frame that had
/// no callback does nothing.
#[derive(Debug, Clone)]
pub struct Ack {
    target: Option<(u64, mpsc::Sender<ServerMessage>)>,
}

impl Ack {
    pub fn new(id: Option<u64>, sender: &mpsc::Sender<ServerMessage>) -> Self {
        Self {
            target: id.map(|id| (id, sender.clone())),
        }
    }

    #[cfg(test)]
    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }

    /// Invoke the callback with node-style arguments
    pub async fn reply(self, args: Vec<Value>) {
        if let Some((ack, sender)) = self.target {
            let _ = sender.send(ServerMessage::Ack { ack, args }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(json: Value) -> Option<ClientEvent> {
        let frame: Frame = serde_json::from_value(json).unwrap();
        ClientEvent::parse(frame)
    }

    #[test]
    fn test_parse_join() {
        let event = parse(json!({"event": "join", "data": "R1", "ack": 1}));
        assert_eq!(event, Some(ClientEvent::Join(RoomName::new("R1").unwrap())));
    }

    #[test]
    fn test_join_requires_non_empty_string() {
        assert_eq!(parse(json!({"event": "join", "data": 5})), None);
        assert_eq!(parse(json!({"event": "join", "data": ""})), None);
        assert_eq!(parse(json!({"event": "join"})), None);
    }

    #[test]
    fn test_parse_message_keeps_payload() {
        let event = parse(json!({
            "event": "message",
            "data": {"to": "abc", "type": "offer", "payload": {"sdp": "v=0"}}
        }));
        match event {
            Some(ClientEvent::Message { to, payload }) => {
                assert_eq!(to, "abc");
                assert_eq!(payload["type"], "offer");
                assert_eq!(payload["to"], "abc");
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_empty_message_ignored() {
        assert_eq!(parse(json!({"event": "message"})), None);
        assert_eq!(parse(json!({"event": "message", "data": null})), None);
        assert_eq!(parse(json!({"event": "message", "data": "hello"})), None);
    }

    #[test]
    fn test_parse_create_variants() {
        assert_eq!(parse(json!({"event": "create"})), Some(ClientEvent::Create(None)));
        assert_eq!(
            parse(json!({"event": "create", "data": ""})),
            Some(ClientEvent::Create(None))
        );
        assert_eq!(
            parse(json!({"event": "create", "data": "mine"})),
            Some(ClientEvent::Create(RoomName::new("mine")))
        );
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert_eq!(parse(json!({"event": "trace", "data": {}})), None);
    }

    #[test]
    fn test_remove_serialization() {
        let id = ClientId::new();
        let msg = ServerMessage::Remove { id, kind: None };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"event": "remove", "data": {"id": id.to_string()}}));

        let msg = ServerMessage::Remove {
            id,
            kind: Some("screen".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"]["type"], "screen");
    }

    #[test]
    fn test_server_message_event_names() {
        let json = serde_json::to_string(&ServerMessage::Stunservers(vec![])).unwrap();
        assert!(json.contains("\"event\":\"stunservers\""));

        let json = serde_json::to_string(&ServerMessage::Ack {
            ack: 7,
            args: vec![Value::Null],
        })
        .unwrap();
        assert!(json.contains("\"event\":\"ack\""));
        assert!(json.contains("\"ack\":7"));
    }

    #[tokio::test]
    async fn test_ack_reply() {
        let (tx, mut rx) = mpsc::channel(4);

        Ack::new(Some(3), &tx).reply(vec![json!("id")]).await;
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Ack {
                ack: 3,
                args: vec![json!("id")]
            })
        );

        let noop = Ack::new(None, &tx);
        assert!(noop.is_noop());
        noop.reply(vec![json!("ignored")]).await;
        assert!(rx.try_recv().is_err());
    }
}
