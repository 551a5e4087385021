//! System of record for the conversation subsystem.
//!
//! Every component reads and writes through the [`ChatStore`] trait. Two
//! implementations exist: [`PgStore`] (Postgres via sqlx, the production
//! backend) and [`MemoryStore`] (used by tests and database-less dev runs).

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("not found")]
    NotFound,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Input for creating a conversation.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub salon_id: Uuid,
    pub client_user_id: Uuid,
    pub appointment_id: Option<String>,
    pub subject: Option<String>,
}

/// Input for persisting a message; attachments are created atomically with
/// the message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<NewAttachment>,
}

/// Partial update for a conversation; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub subject: Option<String>,
    pub status: Option<ConversationStatus>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    // Users (read-only projection of the identity domain)
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    // Conversations
    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError>;
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;
    async fn find_conversation_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;
    /// Conversations where the user is either participant, newest activity
    /// first. Returns the page and the total row count.
    async fn list_conversations(
        &self,
        user_id: Uuid,
        status: Option<ConversationStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Conversation>, i64), StoreError>;
    async fn update_conversation(
        &self,
        id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError>;
    /// Hard delete; cascades to messages, attachments, counters and queue
    /// entries.
    async fn delete_conversation(&self, id: Uuid) -> Result<(), StoreError>;

    // Messages
    /// Persists the message and its attachments atomically and advances the
    /// conversation's `last_message_at`/`updated_at`.
    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError>;
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;
    /// Newest-first page plus total message count for the conversation.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Message>, i64), StoreError>;
    async fn latest_message(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError>;
    async fn mark_message_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Marks every unread message in the conversation not authored by
    /// `reader_id` as read. Returns how many rows changed.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn delete_message(&self, id: Uuid) -> Result<(), StoreError>;

    // Retention sweeps
    async fn archive_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        archived_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // Unread counters (upsert-style atomic operations)
    async fn increment_unread(&self, conversation_id: Uuid, user_id: Uuid)
        -> Result<i64, StoreError>;
    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), StoreError>;
    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid)
        -> Result<i64, StoreError>;
    async fn total_unread(&self, user_id: Uuid) -> Result<i64, StoreError>;

    // Notification preferences
    async fn get_or_create_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<NotificationPreference, StoreError>;
    async fn update_preferences(
        &self,
        user_id: Uuid,
        email_enabled: Option<bool>,
        email_frequency: Option<EmailFrequency>,
    ) -> Result<NotificationPreference, StoreError>;
    async fn set_conversation_muted(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        muted: bool,
    ) -> Result<(), StoreError>;

    // Email notification queue
    /// Increments the message count of an existing PENDING entry, if any.
    async fn increment_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<EmailQueueEntry>, StoreError>;
    async fn insert_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<EmailQueueEntry, StoreError>;
    async fn pending_notifications(&self, limit: i64) -> Result<Vec<EmailQueueEntry>, StoreError>;
    async fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn mark_notification_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;
    /// Removes a still-PENDING entry once the recipient has read the
    /// conversation. Returns whether an entry existed.
    async fn delete_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<bool, StoreError>;
}
