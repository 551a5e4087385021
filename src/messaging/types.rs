//! Request/response types for the conversation REST surface and the
//! realtime gateway payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{
    Attachment, Conversation, ConversationStatus, EmailFrequency, Message, MessageType,
    NewAttachment,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub counterpart_id: Uuid,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<ConversationStatus>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl Pagination {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub status: Option<ConversationStatus>,
}

impl ConversationQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePreferencesRequest {
    #[serde(default)]
    pub email_enabled: Option<bool>,
    #[serde(default)]
    pub email_frequency: Option<EmailFrequency>,
}

/// A message with the sender's display fields resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

impl MessageResponse {
    pub fn from_message(message: Message, sender_name: impl Into<String>) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name: sender_name.into(),
            content: message.content,
            message_type: message.message_type,
            is_read: message.is_read,
            read_at: message.read_at,
            created_at: message.created_at,
            attachments: message.attachments,
        }
    }
}

/// A conversation annotated for the requesting participant.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
    pub last_message: Option<MessageResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountResponse {
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps() {
        let p = Pagination {
            page: Some(0),
            limit: Some(10_000),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), MAX_PAGE_SIZE);

        let d = Pagination::default();
        assert_eq!(d.page(), 1);
        assert_eq!(d.limit(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn send_message_defaults_to_text() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        assert_eq!(req.message_type, MessageType::Text);
        assert!(req.attachments.is_empty());
    }
}
