//! Entity types for the conversation subsystem.
//!
//! These map 1:1 onto the tables in `migrations/` and are shared by the
//! Postgres and in-memory store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role attached to an identity by the external identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Salon,
    Client,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Salon => "salon",
            UserRole::Client => "client",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "salon" => Some(UserRole::Salon),
            "client" => Some(UserRole::Client),
            _ => None,
        }
    }
}

/// Minimal projection of a user record; the full profile lives in the
/// external CRM/identity domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "ACTIVE",
            ConversationStatus::Archived => "ARCHIVED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ConversationStatus::Active),
            "ARCHIVED" => Some(ConversationStatus::Archived),
            _ => None,
        }
    }
}

/// A two-party salon/client conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub salon_id: Uuid,
    pub client_user_id: Uuid,
    pub appointment_id: Option<String>,
    pub subject: Option<String>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user_id` is one of the two participants.
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.salon_id == user_id || self.client_user_id == user_id
    }

    /// The participant on the other side of the conversation.
    ///
    /// Callers must have checked `is_participant` first; for a
    /// non-participant this returns the salon side.
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.salon_id == user_id {
            self.client_user_id
        } else {
            self.salon_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::System => "SYSTEM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(MessageType::Text),
            "IMAGE" => Some(MessageType::Image),
            "SYSTEM" => Some(MessageType::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion sequence; the tie-breaker for ordering.
    pub seq: i64,
    pub archived_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_name: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: Option<String>,
}

/// Attachment payload as supplied by the client, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttachment {
    pub file_name: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub storage_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCounter {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailFrequency {
    Instant,
    Hourly,
    Daily,
}

impl EmailFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailFrequency::Instant => "instant",
            EmailFrequency::Hourly => "hourly",
            EmailFrequency::Daily => "daily",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "instant" => Some(EmailFrequency::Instant),
            "hourly" => Some(EmailFrequency::Hourly),
            "daily" => Some(EmailFrequency::Daily),
            _ => None,
        }
    }
}

/// Per-user notification settings, created lazily with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub email_enabled: bool,
    pub email_frequency: EmailFrequency,
    pub muted_conversations: Vec<Uuid>,
}

impl NotificationPreference {
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            email_enabled: true,
            email_frequency: EmailFrequency::Instant,
            muted_conversations: Vec::new(),
        }
    }

    pub fn is_muted(&self, conversation_id: Uuid) -> bool {
        self.muted_conversations.contains(&conversation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Sent => "SENT",
            QueueStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueueStatus::Pending),
            "SENT" => Some(QueueStatus::Sent),
            "FAILED" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// One batched email digest entry. PENDING entries accumulate unread
/// messages; SENT and FAILED rows are immutable history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailQueueEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub status: QueueStatus,
    pub message_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_resolution() {
        let salon = Uuid::new_v4();
        let client = Uuid::new_v4();
        let conv = Conversation {
            id: Uuid::new_v4(),
            salon_id: salon,
            client_user_id: client,
            appointment_id: None,
            subject: None,
            status: ConversationStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_message_at: Utc::now(),
        };

        assert!(conv.is_participant(salon));
        assert!(conv.is_participant(client));
        assert!(!conv.is_participant(Uuid::new_v4()));
        assert_eq!(conv.counterpart_of(salon), client);
        assert_eq!(conv.counterpart_of(client), salon);
    }

    #[test]
    fn enum_string_round_trips() {
        assert_eq!(ConversationStatus::from_str("ARCHIVED"), Some(ConversationStatus::Archived));
        assert_eq!(MessageType::from_str("SYSTEM"), Some(MessageType::System));
        assert_eq!(QueueStatus::from_str("FAILED"), Some(QueueStatus::Failed));
        assert_eq!(UserRole::from_str("stylist"), None);
        assert_eq!(EmailFrequency::from_str("instant"), Some(EmailFrequency::Instant));
    }
}
