//! Message protocol definitions
//!
//! JSON records exchanged over the WebSocket. Inbound records are told apart
//! by their `type` field: `create`, `join`, `leave` and `list` are room
//! actions, any other non-empty type is a chat message whose type is echoed
//! back to recipients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::outbox::Payload;
use crate::types::RoomId;

/// Raw shape of an inbound record before classification
#[derive(Debug, Deserialize)]
struct InboundRecord {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "roomId", default)]
    room_id: Option<String>,
    #[serde(rename = "roomName", default)]
    room_name: Option<String>,
}

/// Room-control actions a client can request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAction {
    /// Create a room and join it
    Create { room_name: String },
    /// Join an existing room by id
    Join { room_id: String },
    /// Leave the current room
    Leave,
    /// List all active rooms
    List,
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Room(RoomAction),
    /// Chat message; `kind` is the client-chosen type (e.g. "text")
    Chat { kind: String, content: String },
}

impl ClientMessage {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let record: InboundRecord = serde_json::from_str(text)?;

        let action = match record.kind.as_str() {
            "" => return Err(AppError::InvalidMessage("missing type".to_string())),
            "create" => RoomAction::Create {
                room_name: record.room_name.unwrap_or_default(),
            },
            "join" => RoomAction::Join {
                room_id: record.room_id.unwrap_or_default(),
            },
            "leave" => RoomAction::Leave,
            "list" => RoomAction::List,
            _ => {
                return Ok(ClientMessage::Chat {
                    kind: record.kind,
                    content: record.content,
                })
            }
        };
        Ok(ClientMessage::Room(action))
    }
}

/// Chat record as broadcast to other clients
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub username: String,
    pub content: String,
    pub timestamp: String,
    /// Sender's current room; absent for global chat
    #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

/// One entry of a `room_list` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub client_count: usize,
    pub created_by: String,
    pub created_at: String,
}

/// Server → Client message
///
/// Everything except chat records. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join/leave notices
    System { message: String, timestamp: String },
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_id: RoomId,
        room_name: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: RoomId,
        room_name: String,
        message: String,
    },
    RoomError { message: String },
    RoomLeft { message: String },
    RoomList { rooms: Vec<RoomSummary> },
}

impl ServerMessage {
    /// System notice stamped with the current time
    pub fn system(message: impl Into<String>) -> Self {
        ServerMessage::System {
            message: message.into(),
            timestamp: crate::types::timestamp(),
        }
    }
}

/// Serialize an outbound record into a shareable payload
pub fn encode<T: Serialize>(msg: &T) -> Result<Payload, AppError> {
    let json = serde_json::to_string(msg)?;
    Ok(Arc::from(json))
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let message = match &err {
            AppError::RoomNotFound(_) => "Room not found".to_string(),
            AppError::NotInRoom => "You are not in a room".to_string(),
            AppError::InvalidMessage(reason) => format!("Invalid message: {}", reason),
            AppError::Json(e) => format!("Invalid message format: {}", e),
            // Fatal errors are not typically converted (connection closes)
            _ => "Internal error".to_string(),
        };
        ServerMessage::RoomError { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_actions() {
        let msg = ClientMessage::parse(r#"{"type":"create","roomName":"general"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Room(RoomAction::Create {
                room_name: "general".to_string()
            })
        );

        let msg = ClientMessage::parse(r#"{"type":"join","roomId":"room_1_abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Room(RoomAction::Join {
                room_id: "room_1_abc".to_string()
            })
        );

        assert_eq!(
            ClientMessage::parse(r#"{"type":"leave"}"#).unwrap(),
            ClientMessage::Room(RoomAction::Leave)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"list"}"#).unwrap(),
            ClientMessage::Room(RoomAction::List)
        );
    }

    #[test]
    fn test_parse_chat_ignores_client_set_fields() {
        let msg = ClientMessage::parse(
            r#"{"type":"text","content":"hi","username":"mallory","timestamp":"x","roomId":"r"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Chat {
                kind: "text".to_string(),
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(AppError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"content":"hi"}"#),
            Err(AppError::InvalidMessage(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":42}"#),
            Err(AppError::Json(_))
        ));
    }

    #[test]
    fn test_room_created_serialize() {
        let msg = ServerMessage::RoomCreated {
            room_id: RoomId::from("room_1_abc"),
            room_name: "general".to_string(),
            message: "Room created successfully".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"room_created","roomId":"room_1_abc","roomName":"general","message":"Room created successfully"}"#
        );
    }

    #[test]
    fn test_room_list_serialize() {
        let msg = ServerMessage::RoomList {
            rooms: vec![RoomSummary {
                id: RoomId::from("r1"),
                name: "general".to_string(),
                client_count: 2,
                created_by: "A".to_string(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
            }],
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "room_list");
        assert_eq!(value["rooms"][0]["clientCount"], 2);
        assert_eq!(value["rooms"][0]["createdBy"], "A");
        assert_eq!(value["rooms"][0]["createdAt"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_chat_serialize() {
        let global = ChatMessage {
            kind: "text".to_string(),
            username: "A".to_string(),
            content: "hi".to_string(),
            timestamp: "t".to_string(),
            room_id: None,
        };
        let json = serde_json::to_string(&global).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(!json.contains("roomId"));

        let scoped = ChatMessage {
            room_id: Some(RoomId::from("r1")),
            ..global
        };
        let json = serde_json::to_string(&scoped).unwrap();
        assert!(json.contains("\"roomId\":\"r1\""));
    }

    #[test]
    fn test_error_conversion() {
        let msg: ServerMessage = AppError::RoomNotFound("r".to_string()).into();
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"room_error","message":"Room not found"}"#);
    }
}
