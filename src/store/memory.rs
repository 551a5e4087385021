//! In-memory [`ChatStore`] implementation.
//!
//! Backs the test suite and database-less development runs. Semantics match
//! the Postgres implementation, including the single-PENDING-entry rule and
//! the monotone `last_message_at`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::*;
use super::{ChatStore, ConversationUpdate, NewConversation, NewMessage, StoreError};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserRecord>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    counters: HashMap<(Uuid, Uuid), UnreadCounter>,
    preferences: HashMap<Uuid, NotificationPreference>,
    queue: Vec<EmailQueueEntry>,
    next_seq: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user record; the relational schema owns users in
    /// production, tests and dev runs seed them here.
    pub async fn insert_user(&self, user: UserRecord) {
        self.inner.lock().await.users.insert(user.id, user);
    }

    /// Every queue entry regardless of status. Test-only hook; the trait
    /// surface exposes PENDING entries only.
    pub async fn queue_entries(&self) -> Vec<EmailQueueEntry> {
        self.inner.lock().await.queue.clone()
    }

    /// Rewrites a message's timestamps so retention sweeps can be exercised
    /// without waiting out the window. Test-only hook.
    pub async fn backdate_message(
        &self,
        id: Uuid,
        created_at: DateTime<Utc>,
        archived_at: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) {
            message.created_at = created_at;
            if archived_at.is_some() {
                message.archived_at = archived_at;
            }
        }
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            salon_id: new.salon_id,
            client_user_id: new.client_user_id,
            appointment_id: new.appointment_id,
            subject: new.subject,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            last_message_at: now,
        };
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.lock().await.conversations.get(&id).cloned())
    }

    async fn find_conversation_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .conversations
            .values()
            .find(|c| c.appointment_id.as_deref() == Some(appointment_id))
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        status: Option<ConversationStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Conversation>, i64), StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        let total = rows.len() as i64;
        let offset = (page.saturating_sub(1) as usize) * limit as usize;
        let rows = rows.into_iter().skip(offset).take(limit as usize).collect();
        Ok((rows, total))
    }

    async fn update_conversation(
        &self,
        id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock().await;
        let conversation = inner.conversations.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(subject) = update.subject {
            conversation.subject = Some(subject);
        }
        if let Some(status) = update.status {
            conversation.status = status;
        }
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.conversations.remove(&id).ok_or(StoreError::NotFound)?;
        inner.messages.retain(|m| m.conversation_id != id);
        inner.counters.retain(|(conv, _), _| *conv != id);
        inner.queue.retain(|e| e.conversation_id != id);
        Ok(())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&new.conversation_id) {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let message_id = Uuid::new_v4();
        let attachments = new
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: Uuid::new_v4(),
                message_id,
                file_name: a.file_name,
                url: a.url,
                mime_type: a.mime_type,
                size_bytes: a.size_bytes,
                storage_key: a.storage_key,
            })
            .collect();
        let message = Message {
            id: message_id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            message_type: new.message_type,
            is_read: false,
            read_at: None,
            created_at: now,
            seq,
            archived_at: None,
            attachments,
        };
        inner.messages.push(message.clone());
        if let Some(conversation) = inner.conversations.get_mut(&new.conversation_id) {
            if now > conversation.last_message_at {
                conversation.last_message_at = now;
            }
            conversation.updated_at = now;
        }
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Message>, i64), StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.archived_at.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        let total = rows.len() as i64;
        let offset = (page.saturating_sub(1) as usize) * limit as usize;
        let rows = rows.into_iter().skip(offset).take(limit as usize).collect();
        Ok((rows, total))
    }

    async fn latest_message(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError> {
        let (rows, _) = self.list_messages(conversation_id, 1, 1).await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_message_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound)?;
        if !message.is_read {
            message.is_read = true;
            message.read_at = Some(at);
        }
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut changed = 0;
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id && m.sender_id != reader_id && !m.is_read)
        {
            message.is_read = true;
            message.read_at = Some(at);
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != id);
        if inner.messages.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn archive_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        archived_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut archived = 0;
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.archived_at.is_none() && m.created_at < cutoff)
        {
            message.archived_at = Some(archived_at);
            archived += 1;
        }
        Ok(archived)
    }

    async fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| m.archived_at.map(|at| at >= cutoff).unwrap_or(true));
        Ok((before - inner.messages.len()) as u64)
    }

    async fn increment_unread(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let counter = inner
            .counters
            .entry((conversation_id, user_id))
            .or_insert_with(|| UnreadCounter {
                conversation_id,
                user_id,
                count: 0,
                updated_at: Utc::now(),
            });
        counter.count += 1;
        counter.updated_at = Utc::now();
        Ok(counter.count)
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(counter) = inner.counters.get_mut(&(conversation_id, user_id)) {
            counter.count = 0;
            counter.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .counters
            .get(&(conversation_id, user_id))
            .map(|c| c.count)
            .unwrap_or(0))
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .counters
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.count)
            .sum())
    }

    async fn get_or_create_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<NotificationPreference, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreference::defaults(user_id))
            .clone())
    }

    async fn update_preferences(
        &self,
        user_id: Uuid,
        email_enabled: Option<bool>,
        email_frequency: Option<EmailFrequency>,
    ) -> Result<NotificationPreference, StoreError> {
        let mut inner = self.inner.lock().await;
        let prefs = inner
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreference::defaults(user_id));
        if let Some(enabled) = email_enabled {
            prefs.email_enabled = enabled;
        }
        if let Some(frequency) = email_frequency {
            prefs.email_frequency = frequency;
        }
        Ok(prefs.clone())
    }

    async fn set_conversation_muted(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        muted: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let prefs = inner
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreference::defaults(user_id));
        if muted {
            if !prefs.muted_conversations.contains(&conversation_id) {
                prefs.muted_conversations.push(conversation_id);
            }
        } else {
            prefs.muted_conversations.retain(|id| *id != conversation_id);
        }
        Ok(())
    }

    async fn increment_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<EmailQueueEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.queue.iter_mut().find(|e| {
            e.conversation_id == conversation_id
                && e.recipient_id == recipient_id
                && e.status == QueueStatus::Pending
        });
        Ok(entry.map(|e| {
            e.message_count += 1;
            e.updated_at = Utc::now();
            e.clone()
        }))
    }

    async fn insert_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<EmailQueueEntry, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let entry = EmailQueueEntry {
            id: Uuid::new_v4(),
            conversation_id,
            recipient_id,
            status: QueueStatus::Pending,
            message_count: 1,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        };
        inner.queue.push(entry.clone());
        Ok(entry)
    }

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<EmailQueueEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<EmailQueueEntry> = inner
            .queue
            .iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .queue
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound)?;
        entry.status = QueueStatus::Sent;
        entry.sent_at = Some(at);
        entry.updated_at = at;
        Ok(())
    }

    async fn mark_notification_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .queue
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound)?;
        entry.status = QueueStatus::Failed;
        entry.failure_reason = Some(reason.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner.queue.retain(|e| {
            !(e.conversation_id == conversation_id
                && e.recipient_id == recipient_id
                && e.status == QueueStatus::Pending)
        });
        Ok(inner.queue.len() != before)
    }
}
