use crate::domain::message::{Message, MessageStatus};
use crate::domain::user::UserProfile;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// WebSocket close code sent to a connection that a newer one for the same user replaced.
/// Clients receiving it should not reconnect.
pub const CLOSE_SUPERSEDED: u16 = 4001;

/// Server to client frames on the push channel.
///
/// Encoded as `{"event": "<name>", "data": {...}}` JSON text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage { message: Message, sender: UserProfile },
    MessageStatus(StatusUpdate),
}

impl ServerEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "newMessage",
            Self::MessageStatus(_) => "messageStatus",
        }
    }
}

/// Read receipt covering every message `sender_id` has sent to `seen_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub sender_id: Uuid,
    pub seen_by: Uuid,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_wire_format() {
        let sender_id = Uuid::new_v4();
        let seen_by = Uuid::new_v4();
        let event = ServerEvent::MessageStatus(StatusUpdate {
            sender_id,
            seen_by,
            status: MessageStatus::Seen,
            at: OffsetDateTime::UNIX_EPOCH,
        });

        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["event"], "messageStatus");
        assert_eq!(value["data"]["senderId"], sender_id.to_string());
        assert_eq!(value["data"]["seenBy"], seen_by.to_string());
        assert_eq!(value["data"]["status"], "seen");
    }

    #[test]
    fn test_new_message_event_parses() {
        let raw = r#"{
            "event": "newMessage",
            "data": {
                "message": {
                    "id": "0190c6a4-7b7e-7cc2-8e4b-2f1a9f0c1a11",
                    "senderId": "5b0f4c65-8a38-4e43-9d7c-0c6f0f3b8f1e",
                    "recipientId": "9a8d7c6b-5a49-4382-b1c0-d9e8f7a6b5c4",
                    "text": "hi",
                    "status": "delivered",
                    "createdAt": "2026-10-18T12:00:00Z"
                },
                "sender": { "id": "5b0f4c65-8a38-4e43-9d7c-0c6f0f3b8f1e", "username": "alice" }
            }
        }"#;

        let event: ServerEvent = serde_json::from_str(raw).expect("parses");
        let ServerEvent::NewMessage { message, sender } = event else {
            panic!("expected newMessage");
        };
        assert_eq!(message.body.as_deref(), Some("hi"));
        assert_eq!(message.attachment, None);
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(sender.username, "alice");
    }
}
