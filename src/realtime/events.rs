//! Wire events for the websocket gateway.
//!
//! One tagged envelope in each direction: `{"event": "...", "data": {...}}`.
//! Client events are the messages a connection may send; server events are
//! what the backend pushes, either directly to one connection or fanned out
//! through the event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::types::MessageResponse;
use crate::store::{MessageType, NewAttachment};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: Option<MessageType>,
        #[serde(default)]
        attachments: Vec<NewAttachment>,
    },
    MarkAsRead {
        message_id: Uuid,
    },
    MarkConversationAsRead {
        conversation_id: Uuid,
    },
    UserTyping {
        conversation_id: Uuid,
    },
    UserStoppedTyping {
        conversation_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage {
        message: MessageResponse,
    },
    MessageRead {
        conversation_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
        reader_id: Uuid,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    UserStoppedTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    UserOnline {
        user_id: Uuid,
    },
    UserOffline {
        user_id: Uuid,
    },
    UnreadCountUpdated {
        total: i64,
    },
    ConversationHistory {
        conversation_id: Uuid,
        messages: Vec<MessageResponse>,
        page: u32,
        total: i64,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_use_kebab_case_tags() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join-conversation",
            "data": { "conversation_id": Uuid::new_v4() }
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::JoinConversation { .. }));

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": { "conversation_id": Uuid::new_v4(), "content": "hi" }
        }))
        .unwrap();
        match event {
            ClientEvent::SendMessage {
                message_type,
                attachments,
                ..
            } => {
                assert!(message_type.is_none());
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_client_event_is_an_error() {
        let result: Result<ClientEvent, _> = serde_json::from_value(json!({
            "event": "self-destruct",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn server_events_serialize_with_kebab_case_tags() {
        let value = serde_json::to_value(ServerEvent::UserOnline {
            user_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["event"], "user-online");

        let value = serde_json::to_value(ServerEvent::UnreadCountUpdated { total: 3 }).unwrap();
        assert_eq!(value["event"], "unread-count-updated");
        assert_eq!(value["data"]["total"], 3);

        let value = serde_json::to_value(ServerEvent::MessageRead {
            conversation_id: Uuid::nil(),
            message_id: None,
            reader_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["event"], "message-read");
        assert!(value["data"].get("message_id").is_none());
    }
}
