/// WebSocket frame types for the realtime channel
use crate::models::ParticipantRole;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server -> client frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    /// Connection established confirmation
    Connected { identity: Uuid, timestamp: i64 },

    /// A new chat message in a session the client participates in
    MessageNew {
        message_id: Uuid,
        session_id: Uuid,
        sender_id: Uuid,
        body: String,
        timestamp: i64,
    },

    /// A participant joined a session
    ParticipantJoined {
        session_id: Uuid,
        identity: Uuid,
        role: ParticipantRole,
    },

    /// A session was closed
    SessionClosed {
        session_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Transient typing indicator, never persisted
    Typing {
        session_id: Uuid,
        identity: Uuid,
        is_typing: bool,
    },

    /// In-app notification pushed to a live connection
    Notification {
        notification_id: Uuid,
        title: String,
        body: String,
        timestamp: i64,
    },

    /// This connection was replaced by a newer one for the same identity
    Evicted { reason: String },

    /// Heartbeat from server
    Ping { timestamp: i64 },

    /// Error frame
    Error { code: String, message: String },
}

impl WsEvent {
    pub fn connected(identity: Uuid) -> Self {
        WsEvent::Connected {
            identity,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn message_new(message_id: Uuid, session_id: Uuid, sender_id: Uuid, body: &str) -> Self {
        WsEvent::MessageNew {
            message_id,
            session_id,
            sender_id,
            body: body.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn notification(notification_id: Uuid, title: &str, body: &str) -> Self {
        WsEvent::Notification {
            notification_id,
            title: title.to_string(),
            body: body.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn evicted() -> Self {
        WsEvent::Evicted {
            reason: "replaced by a newer connection".to_string(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        WsEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client -> server frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientEvent {
    /// Explicit delivery/read acknowledgment for a message
    Ack {
        message_id: Uuid,
        /// "delivered" or "read"
        status: String,
    },

    /// Typing indicator toggle
    Typing { session_id: Uuid, is_typing: bool },
}

impl WsClientEvent {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new_roundtrip() {
        let event = WsEvent::message_new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "hello");
        let json = event.to_json().unwrap();
        let parsed: WsEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WsEvent::MessageNew { .. }));
        assert!(json.contains("message_new"));
    }

    #[test]
    fn test_client_ack_parses() {
        let json = r#"{"type":"ack","message_id":"6f6ac43c-40a4-4d15-9a5c-64d4de171a56","status":"read"}"#;
        let parsed = WsClientEvent::from_json(json).unwrap();
        assert!(matches!(parsed, WsClientEvent::Ack { .. }));
    }

    #[test]
    fn test_client_typing_parses() {
        let session_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"typing","session_id":"{}","is_typing":true}}"#,
            session_id
        );
        match WsClientEvent::from_json(&json).unwrap() {
            WsClientEvent::Typing {
                session_id: parsed,
                is_typing,
            } => {
                assert_eq!(parsed, session_id);
                assert!(is_typing);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_client_frame_rejected() {
        assert!(WsClientEvent::from_json(r#"{"type":"subscribe"}"#).is_err());
    }
}
