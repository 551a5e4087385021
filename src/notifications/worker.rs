//! Digest flush worker.
//!
//! Scans PENDING queue entries on an interval, renders one digest per
//! entry and hands it to the mailer. Outcomes are terminal: SENT entries
//! restart the rate window, FAILED entries keep their reason and are never
//! retried automatically. A failure on one entry never blocks the rest of
//! the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::ratelimit::NotificationRateLimiter;
use crate::store::{ChatStore, EmailQueueEntry, StoreError};

use super::digest;
use super::mailer::Mailer;

const BATCH_SIZE: i64 = 100;
const PREVIEW_MESSAGES: usize = 3;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Clone)]
pub struct NotificationFlushWorker {
    store: Arc<dyn ChatStore>,
    mailer: Arc<dyn Mailer>,
    limiter: NotificationRateLimiter,
}

impl NotificationFlushWorker {
    pub fn new(
        store: Arc<dyn ChatStore>,
        mailer: Arc<dyn Mailer>,
        limiter: NotificationRateLimiter,
    ) -> Self {
        Self {
            store,
            mailer,
            limiter,
        }
    }

    /// One pass over the PENDING entries.
    pub async fn flush_once(&self) -> Result<FlushReport, StoreError> {
        let pending = self.store.pending_notifications(BATCH_SIZE).await?;
        let mut report = FlushReport::default();

        for entry in pending {
            match self.flush_entry(&entry).await {
                Ok(EntryOutcome::Sent) => report.sent += 1,
                Ok(EntryOutcome::Skipped) => report.skipped += 1,
                Ok(EntryOutcome::Failed) => report.failed += 1,
                Err(err) => {
                    tracing::error!(entry_id = %entry.id, "digest flush error: {err}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn flush_entry(&self, entry: &EmailQueueEntry) -> Result<EntryOutcome, StoreError> {
        let Some(conversation) = self.store.get_conversation(entry.conversation_id).await? else {
            // Conversation deletion cascades to its queue entries; an entry
            // read before the delete just gets dropped here.
            tracing::warn!(entry_id = %entry.id, "conversation gone, skipping digest");
            return Ok(EntryOutcome::Skipped);
        };

        let Some(recipient) = self.store.get_user(entry.recipient_id).await? else {
            self.store
                .mark_notification_failed(entry.id, "recipient account not found")
                .await?;
            return Ok(EntryOutcome::Failed);
        };

        // Preferences may have changed since the entry was queued.
        let prefs = self
            .store
            .get_or_create_preferences(entry.recipient_id)
            .await?;
        if !prefs.email_enabled || prefs.is_muted(conversation.id) {
            self.store
                .delete_pending_notification(conversation.id, entry.recipient_id)
                .await?;
            tracing::info!(entry_id = %entry.id, "recipient opted out, dropping digest");
            return Ok(EntryOutcome::Skipped);
        }

        let sender_id = conversation.counterpart_of(entry.recipient_id);
        let sender_name = self
            .store
            .get_user(sender_id)
            .await?
            .map(|u| u.display_name)
            .unwrap_or_else(|| "Your salon".to_string());

        let previews = self.previews(&conversation, entry.recipient_id).await?;
        let digest = digest::render(
            &sender_name,
            conversation.subject.as_deref(),
            entry.message_count,
            &previews,
        );

        match self
            .mailer
            .send(&recipient.email, &digest.subject, &digest.html)
            .await
        {
            Ok(transport_id) => {
                self.store.mark_notification_sent(entry.id, Utc::now()).await?;
                self.limiter
                    .record_send(conversation.id, entry.recipient_id)
                    .await;
                tracing::info!(
                    entry_id = %entry.id,
                    %transport_id,
                    messages = entry.message_count,
                    "digest email sent"
                );
                Ok(EntryOutcome::Sent)
            }
            Err(err) => {
                tracing::warn!(entry_id = %entry.id, "digest email failed: {err}");
                self.store
                    .mark_notification_failed(entry.id, &err.to_string())
                    .await?;
                Ok(EntryOutcome::Failed)
            }
        }
    }

    /// The newest unread message bodies from the counterpart, newest first.
    async fn previews(
        &self,
        conversation: &crate::store::Conversation,
        recipient_id: Uuid,
    ) -> Result<Vec<String>, StoreError> {
        let (messages, _) = self.store.list_messages(conversation.id, 1, 20).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.sender_id != recipient_id && !m.is_read)
            .take(PREVIEW_MESSAGES)
            .map(|m| m.content)
            .collect())
    }

    /// Runs [`flush_once`](Self::flush_once) forever on an interval.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.flush_once().await {
                    Ok(report) if report.sent + report.failed + report.skipped > 0 => {
                        tracing::info!(
                            sent = report.sent,
                            failed = report.failed,
                            skipped = report.skipped,
                            "digest flush pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!("digest flush pass failed: {err}"),
                }
            }
        })
    }
}

enum EntryOutcome {
    Sent,
    Skipped,
    Failed,
}
