use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Identity;
use crate::db::{MessageReceipt, NewMessage};
use crate::error::ChatError;

pub const MESSAGE_TYPE: &str = "message";

/// Frame sent by clients: `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `message` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub to: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub service_id: Option<i64>,
}

/// What a client can ask the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Send(IncomingMessage),
    /// Envelope type the server does not handle.
    Ignored(String),
}

/// Decodes one client frame.
pub fn decode_frame(bytes: &[u8]) -> Result<ClientRequest, ChatError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;

    if envelope.kind != MESSAGE_TYPE {
        return Ok(ClientRequest::Ignored(envelope.kind));
    }

    let incoming: IncomingMessage = serde_json::from_value(envelope.data)?;
    if incoming.message.is_none() && incoming.service_id.is_none() {
        return Err(ChatError::EmptyMessage);
    }

    Ok(ClientRequest::Send(incoming))
}

/// A stored message as delivered to the recipient's socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub trainer_id: i64,
    pub message: Option<String>,
    pub service_id: Option<i64>,
    pub is_to_user: bool,
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_receipt(message: NewMessage, receipt: MessageReceipt) -> Self {
        Self {
            id: receipt.id,
            user_id: message.user_id,
            trainer_id: message.trainer_id,
            message: message.message,
            service_id: message.service_id,
            is_to_user: message.is_to_user,
            time: receipt.time,
        }
    }

    pub fn recipient(&self) -> Identity {
        if self.is_to_user {
            Identity::user(self.user_id)
        } else {
            Identity::trainer(self.trainer_id)
        }
    }
}

impl NewMessage {
    /// Fills in both sides of the conversation from the sender's role.
    pub fn from_incoming(incoming: IncomingMessage, sender: Identity) -> Self {
        let (user_id, trainer_id) = if sender.is_trainer() {
            (incoming.to, sender.id)
        } else {
            (sender.id, incoming.to)
        };

        Self {
            user_id,
            trainer_id,
            message: incoming.message,
            service_id: incoming.service_id,
            is_to_user: sender.is_trainer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_message_envelope() {
        let request = decode_frame(&frame(json!({
            "type": "message",
            "data": { "to": 2, "message": "hi", "service_id": null }
        })))
        .unwrap();

        assert_eq!(
            request,
            ClientRequest::Send(IncomingMessage {
                to: 2,
                message: Some("hi".to_string()),
                service_id: None,
            })
        );
    }

    #[test]
    fn test_service_only_message_is_accepted() {
        let request = decode_frame(&frame(json!({
            "type": "message",
            "data": { "to": 2, "service_id": 14 }
        })))
        .unwrap();

        assert!(matches!(request, ClientRequest::Send(m) if m.service_id == Some(14)));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let request = decode_frame(&frame(json!({ "type": "typing" }))).unwrap();
        assert_eq!(request, ClientRequest::Ignored("typing".to_string()));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_frame(b"not json"), Err(ChatError::InvalidFormat(_))));

        let missing_to = frame(json!({ "type": "message", "data": { "message": "hi" } }));
        assert!(matches!(decode_frame(&missing_to), Err(ChatError::InvalidFormat(_))));

        let no_data = frame(json!({ "type": "message" }));
        assert!(matches!(decode_frame(&no_data), Err(ChatError::InvalidFormat(_))));

        let empty = frame(json!({ "type": "message", "data": { "to": 2 } }));
        assert!(matches!(decode_frame(&empty), Err(ChatError::EmptyMessage)));
    }

    #[test]
    fn test_user_sender_writes_to_trainer() {
        let incoming = IncomingMessage { to: 2, message: Some("hi".into()), service_id: None };
        let message = NewMessage::from_incoming(incoming, Identity::user(1));

        assert_eq!(message.user_id, 1);
        assert_eq!(message.trainer_id, 2);
        assert!(!message.is_to_user);
    }

    #[test]
    fn test_trainer_sender_writes_to_user() {
        let incoming = IncomingMessage { to: 1, message: None, service_id: Some(9) };
        let new_message = NewMessage::from_incoming(incoming, Identity::trainer(2));
        assert!(new_message.is_to_user);

        let receipt = MessageReceipt { id: 40, time: Utc::now() };
        let message = ChatMessage::from_receipt(new_message, receipt);

        assert_eq!(message.id, 40);
        assert_eq!(message.recipient(), Identity::user(1));
    }

    #[test]
    fn test_delivered_wire_format() {
        let message = ChatMessage {
            id: 3,
            user_id: 1,
            trainer_id: 2,
            message: Some("hi".into()),
            service_id: None,
            is_to_user: false,
            time: Utc::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["user_id"], 1);
        assert_eq!(value["trainer_id"], 2);
        assert_eq!(value["message"], "hi");
        assert!(value["service_id"].is_null());
        assert_eq!(value["is_to_user"], false);
        assert!(value["time"].is_string());
    }
}
