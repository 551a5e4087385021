//! Postgres [`ChatStore`] implementation.
//!
//! Plain `sqlx::query` + `row.get` style; message + attachment creation is
//! transactional, counter and queue mutations are single atomic upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::models::*;
use super::{ChatStore, ConversationUpdate, NewConversation, NewMessage, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attachments_for(&self, message_ids: &[Uuid]) -> Result<Vec<Attachment>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, file_name, url, mime_type, size_bytes, storage_key
            FROM attachments
            WHERE message_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(attachment_from_row).collect())
    }

    async fn hydrate_attachments(&self, messages: &mut [Message]) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let attachments = self.attachments_for(&ids).await?;
        for attachment in attachments {
            if let Some(message) = messages.iter_mut().find(|m| m.id == attachment.message_id) {
                message.attachments.push(attachment);
            }
        }
        Ok(())
    }
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    let status: String = row.get("status");
    Conversation {
        id: row.get("id"),
        salon_id: row.get("salon_id"),
        client_user_id: row.get("client_user_id"),
        appointment_id: row.get("appointment_id"),
        subject: row.get("subject"),
        status: ConversationStatus::from_str(&status).unwrap_or(ConversationStatus::Active),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_message_at: row.get("last_message_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    let message_type: String = row.get("message_type");
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        message_type: MessageType::from_str(&message_type).unwrap_or(MessageType::Text),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
        seq: row.get("seq"),
        archived_at: row.get("archived_at"),
        attachments: Vec::new(),
    }
}

fn attachment_from_row(row: &PgRow) -> Attachment {
    Attachment {
        id: row.get("id"),
        message_id: row.get("message_id"),
        file_name: row.get("file_name"),
        url: row.get("url"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        storage_key: row.get("storage_key"),
    }
}

fn queue_entry_from_row(row: &PgRow) -> EmailQueueEntry {
    let status: String = row.get("status");
    EmailQueueEntry {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        recipient_id: row.get("recipient_id"),
        status: QueueStatus::from_str(&status).unwrap_or(QueueStatus::Pending),
        message_count: row.get("message_count"),
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sent_at: row.get("sent_at"),
    }
}

const CONVERSATION_COLUMNS: &str = "id, salon_id, client_user_id, appointment_id, subject, status, created_at, updated_at, last_message_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, is_read, read_at, created_at, seq, archived_at";
const QUEUE_COLUMNS: &str = "id, conversation_id, recipient_id, status, message_count, failure_reason, created_at, updated_at, sent_at";

#[async_trait]
impl ChatStore for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, display_name, email, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let role: String = r.get("role");
            UserRecord {
                id: r.get("id"),
                display_name: r.get("display_name"),
                email: r.get("email"),
                role: UserRole::from_str(&role).unwrap_or(UserRole::Client),
            }
        }))
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO conversations (id, salon_id, client_user_id, appointment_id, subject)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CONVERSATION_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(new.salon_id)
        .bind(new.client_user_id)
        .bind(new.appointment_id)
        .bind(new.subject)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation_from_row(&row))
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn find_conversation_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE appointment_id = $1"
        ))
        .bind(appointment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        status: Option<ConversationStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Conversation>, i64), StoreError> {
        let status = status.map(|s| s.as_str());
        let offset = (page.saturating_sub(1) as i64) * limit as i64;

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM conversations
            WHERE (salon_id = $1 OR client_user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS} FROM conversations
            WHERE (salon_id = $1 OR client_user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY last_message_at DESC
            LIMIT $3 OFFSET $4
            "#,
        ))
        .bind(user_id)
        .bind(status)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(conversation_from_row).collect(), total))
    }

    async fn update_conversation(
        &self,
        id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE conversations
            SET subject = COALESCE($2, subject),
                status = COALESCE($3, status),
                updated_at = now()
            WHERE id = $1
            RETURNING {CONVERSATION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(update.subject)
        .bind(update.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(conversation_from_row(&row))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, message_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MESSAGE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.content)
        .bind(new.message_type.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let mut message = message_from_row(&row);

        for attachment in new.attachments {
            let row = sqlx::query(
                r#"
                INSERT INTO attachments (id, message_id, file_name, url, mime_type, size_bytes, storage_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, message_id, file_name, url, mime_type, size_bytes, storage_key
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(message.id)
            .bind(attachment.file_name)
            .bind(attachment.url)
            .bind(attachment.mime_type)
            .bind(attachment.size_bytes)
            .bind(attachment.storage_key)
            .fetch_one(&mut *tx)
            .await?;
            message.attachments.push(attachment_from_row(&row));
        }

        // last_message_at is monotone even under clock skew between writers.
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_at = GREATEST(last_message_at, $2), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(new.conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut messages = vec![message_from_row(&row)];
                self.hydrate_attachments(&mut messages).await?;
                Ok(messages.pop())
            }
            None => Ok(None),
        }
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Message>, i64), StoreError> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM messages \
             WHERE conversation_id = $1 AND archived_at IS NULL",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1 AND archived_at IS NULL
            ORDER BY created_at DESC, seq DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(conversation_id)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows.iter().map(message_from_row).collect();
        self.hydrate_attachments(&mut messages).await?;
        Ok((messages, total))
    }

    async fn latest_message(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError> {
        let (messages, _) = self.list_messages(conversation_id, 1, 1).await?;
        Ok(messages.into_iter().next())
    }

    async fn mark_message_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET is_read = true, read_at = $2 WHERE id = $1 AND is_read = false",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = true, read_at = $3
            WHERE conversation_id = $1 AND sender_id <> $2 AND is_read = false
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn archive_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        archived_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET archived_at = $2 WHERE archived_at IS NULL AND created_at < $1",
        )
        .bind(cutoff)
        .bind(archived_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM messages WHERE archived_at IS NOT NULL AND archived_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn increment_unread(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO unread_counters (conversation_id, user_id, count, updated_at)
            VALUES ($1, $2, 1, now())
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET count = unread_counters.count + 1, updated_at = now()
            RETURNING count
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i32 = row.get("count");
        Ok(count as i64)
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE unread_counters SET count = 0, updated_at = now()
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT count FROM unread_counters WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i32, _>("count") as i64).unwrap_or(0))
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(count), 0) AS total FROM unread_counters WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    async fn get_or_create_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<NotificationPreference, StoreError> {
        sqlx::query(
            "INSERT INTO notification_preferences (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT user_id, email_enabled, email_frequency FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let mutes = sqlx::query("SELECT conversation_id FROM conversation_mutes WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let frequency: String = row.get("email_frequency");
        Ok(NotificationPreference {
            user_id: row.get("user_id"),
            email_enabled: row.get("email_enabled"),
            email_frequency: EmailFrequency::from_str(&frequency)
                .unwrap_or(EmailFrequency::Instant),
            muted_conversations: mutes.iter().map(|r| r.get("conversation_id")).collect(),
        })
    }

    async fn update_preferences(
        &self,
        user_id: Uuid,
        email_enabled: Option<bool>,
        email_frequency: Option<EmailFrequency>,
    ) -> Result<NotificationPreference, StoreError> {
        self.get_or_create_preferences(user_id).await?;
        sqlx::query(
            r#"
            UPDATE notification_preferences
            SET email_enabled = COALESCE($2, email_enabled),
                email_frequency = COALESCE($3, email_frequency),
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(email_enabled)
        .bind(email_frequency.map(|f| f.as_str()))
        .execute(&self.pool)
        .await?;
        self.get_or_create_preferences(user_id).await
    }

    async fn set_conversation_muted(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        muted: bool,
    ) -> Result<(), StoreError> {
        if muted {
            sqlx::query(
                r#"
                INSERT INTO conversation_mutes (user_id, conversation_id)
                VALUES ($1, $2)
                ON CONFLICT (user_id, conversation_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "DELETE FROM conversation_mutes WHERE user_id = $1 AND conversation_id = $2",
            )
            .bind(user_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn increment_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<EmailQueueEntry>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE email_notification_queue
            SET message_count = message_count + 1, updated_at = now()
            WHERE conversation_id = $1 AND recipient_id = $2 AND status = 'PENDING'
            RETURNING {QUEUE_COLUMNS}
            "#,
        ))
        .bind(conversation_id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(queue_entry_from_row))
    }

    async fn insert_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<EmailQueueEntry, StoreError> {
        // Upsert against the partial unique index so two processes racing
        // on the same pair fold into one entry.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO email_notification_queue (id, conversation_id, recipient_id, status, message_count)
            VALUES ($1, $2, $3, 'PENDING', 1)
            ON CONFLICT (conversation_id, recipient_id) WHERE status = 'PENDING'
            DO UPDATE SET message_count = email_notification_queue.message_count + 1, updated_at = now()
            RETURNING {QUEUE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(queue_entry_from_row(&row))
    }

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<EmailQueueEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM email_notification_queue
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_entry_from_row).collect())
    }

    async fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_notification_queue
            SET status = 'SENT', sent_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_notification_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_notification_queue
            SET status = 'FAILED', failure_reason = $2, updated_at = now()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_pending_notification(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_notification_queue
            WHERE conversation_id = $1 AND recipient_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(conversation_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
