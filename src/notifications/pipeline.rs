//! Notification fallback decision, taken once per persisted message.
//!
//! The gateway (and the REST send path) call this after a message is
//! stored and broadcast. Online recipients get nothing; offline recipients
//! accumulate into at most one PENDING digest entry per (conversation,
//! recipient), gated by the rate limiter only when a new entry would be
//! opened. An existing PENDING entry always absorbs the message, that is
//! what makes the digest a batch.

use std::sync::Arc;

use uuid::Uuid;

use crate::presence::PresenceTracker;
use crate::ratelimit::NotificationRateLimiter;
use crate::store::{ChatStore, Conversation, EmailQueueEntry, StoreError};

#[derive(Debug)]
pub enum FallbackOutcome {
    /// Recipient has a live connection somewhere; no email.
    RecipientOnline,
    /// Recipient disabled email notifications.
    Disabled,
    /// Recipient muted this conversation.
    Muted,
    /// An email already went out inside the rate window and no PENDING
    /// entry is open; the message rides on read-state only.
    RateLimited,
    /// A new digest entry was opened for this message.
    Queued(EmailQueueEntry),
    /// An existing PENDING entry absorbed this message.
    Accumulated(EmailQueueEntry),
}

#[derive(Clone)]
pub struct NotificationPipeline {
    store: Arc<dyn ChatStore>,
    presence: PresenceTracker,
    limiter: NotificationRateLimiter,
}

impl NotificationPipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        presence: PresenceTracker,
        limiter: NotificationRateLimiter,
    ) -> Self {
        Self {
            store,
            presence,
            limiter,
        }
    }

    /// Decides the fallback for one message. `locally_online` is the
    /// caller's fast-path knowledge (a registry hit on its own process);
    /// when false the shared presence store is still consulted.
    pub async fn handle_message_sent(
        &self,
        conversation: &Conversation,
        recipient_id: Uuid,
        locally_online: bool,
    ) -> Result<FallbackOutcome, StoreError> {
        if locally_online || self.presence.is_online(recipient_id).await {
            return Ok(FallbackOutcome::RecipientOnline);
        }

        let prefs = self.store.get_or_create_preferences(recipient_id).await?;
        if !prefs.email_enabled {
            return Ok(FallbackOutcome::Disabled);
        }
        if prefs.is_muted(conversation.id) {
            return Ok(FallbackOutcome::Muted);
        }

        if let Some(entry) = self
            .store
            .increment_pending_notification(conversation.id, recipient_id)
            .await?
        {
            return Ok(FallbackOutcome::Accumulated(entry));
        }

        if !self.limiter.can_send(conversation.id, recipient_id).await {
            return Ok(FallbackOutcome::RateLimited);
        }

        let entry = self
            .store
            .insert_pending_notification(conversation.id, recipient_id)
            .await?;
        Ok(FallbackOutcome::Queued(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresence;
    use crate::ratelimit::MemoryRateLimit;
    use crate::store::{
        ChatStore, MemoryStore, NewConversation, QueueStatus, UserRecord, UserRole,
    };
    use std::time::Duration;

    struct Fixture {
        pipeline: NotificationPipeline,
        store: Arc<MemoryStore>,
        presence: PresenceTracker,
        conversation: Conversation,
        client: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let salon = Uuid::new_v4();
        let client = Uuid::new_v4();
        store
            .insert_user(UserRecord {
                id: salon,
                display_name: "Chez Nova".into(),
                email: "salon@example.com".into(),
                role: UserRole::Salon,
            })
            .await;
        store
            .insert_user(UserRecord {
                id: client,
                display_name: "Ada".into(),
                email: "ada@example.com".into(),
                role: UserRole::Client,
            })
            .await;
        let conversation = store
            .insert_conversation(NewConversation {
                salon_id: salon,
                client_user_id: client,
                appointment_id: None,
                subject: None,
            })
            .await
            .unwrap();

        let presence =
            PresenceTracker::new(Arc::new(MemoryPresence::new()), Duration::from_secs(60));
        let limiter = NotificationRateLimiter::new(
            Arc::new(MemoryRateLimit::new()),
            Duration::from_secs(300),
        );
        let pipeline = NotificationPipeline::new(
            store.clone() as Arc<dyn ChatStore>,
            presence.clone(),
            limiter,
        );
        Fixture {
            pipeline,
            store,
            presence,
            conversation,
            client,
        }
    }

    #[tokio::test]
    async fn online_recipient_gets_no_email() {
        let f = fixture().await;
        f.presence.mark_online(f.client, Uuid::new_v4()).await;
        let outcome = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        assert!(matches!(outcome, FallbackOutcome::RecipientOnline));
    }

    #[tokio::test]
    async fn local_registry_hit_short_circuits() {
        let f = fixture().await;
        let outcome = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, true)
            .await
            .unwrap();
        assert!(matches!(outcome, FallbackOutcome::RecipientOnline));
    }

    #[tokio::test]
    async fn offline_recipient_opens_one_entry_then_accumulates() {
        let f = fixture().await;
        let first = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        let entry = match first {
            FallbackOutcome::Queued(entry) => entry,
            other => panic!("expected Queued, got {other:?}"),
        };
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.message_count, 1);

        // A second message inside the window joins the same entry without
        // consulting the limiter.
        let second = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        match second {
            FallbackOutcome::Accumulated(updated) => {
                assert_eq!(updated.id, entry.id);
                assert_eq!(updated.message_count, 2);
            }
            other => panic!("expected Accumulated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_and_muted_preferences_suppress() {
        let f = fixture().await;
        f.store
            .update_preferences(f.client, Some(false), None)
            .await
            .unwrap();
        let outcome = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        assert!(matches!(outcome, FallbackOutcome::Disabled));

        f.store
            .update_preferences(f.client, Some(true), None)
            .await
            .unwrap();
        f.store
            .set_conversation_muted(f.client, f.conversation.id, true)
            .await
            .unwrap();
        let outcome = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        assert!(matches!(outcome, FallbackOutcome::Muted));
    }

    #[tokio::test]
    async fn rate_window_blocks_a_new_entry_after_flush() {
        let f = fixture().await;
        let entry = match f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap()
        {
            FallbackOutcome::Queued(entry) => entry,
            other => panic!("expected Queued, got {other:?}"),
        };

        // Simulate the flush worker sending the digest.
        f.store
            .mark_notification_sent(entry.id, chrono::Utc::now())
            .await
            .unwrap();

        // The window was claimed when the entry was opened, so the next
        // offline message inside it cannot open another entry.
        let outcome = f
            .pipeline
            .handle_message_sent(&f.conversation, f.client, false)
            .await
            .unwrap();
        assert!(matches!(outcome, FallbackOutcome::RateLimited));
    }
}
