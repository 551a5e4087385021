//! Shared application state.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::AppConfig;
use crate::messaging::types::MessageResponse;
use crate::messaging::MessagingService;
use crate::notifications::NotificationPipeline;
use crate::presence::PresenceTracker;
use crate::realtime::{EventBus, Scope, ServerEvent, SessionRegistry};
use crate::store::{ChatStore, Conversation};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ChatStore>,
    pub service: MessagingService,
    pub registry: SessionRegistry,
    pub presence: PresenceTracker,
    pub bus: EventBus,
    pub pipeline: NotificationPipeline,
}

impl AppState {
    /// Fans out a freshly persisted message: co-present recipients (some
    /// connection of theirs has the conversation open on this process) get
    /// it marked read before broadcast; otherwise the notification fallback
    /// decides whether an email digest is owed. Returns the message as
    /// broadcast, read flag included.
    pub async fn fan_out_message(
        &self,
        conversation: &Conversation,
        mut message: MessageResponse,
    ) -> MessageResponse {
        let recipient_id = conversation.counterpart_of(message.sender_id);
        let co_present = self
            .registry
            .is_user_in_room(recipient_id, conversation.id)
            .await;

        if co_present {
            match self.service.mark_all_read(recipient_id, conversation.id).await {
                Ok(_) => {
                    message.is_read = true;
                    message.read_at = Some(chrono::Utc::now());
                }
                Err(err) => {
                    tracing::warn!(conversation_id = %conversation.id, "co-presence read failed: {err}")
                }
            }
        }

        self.bus
            .publish(
                Scope::Conversation(conversation.id),
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
            )
            .await;
        self.push_unread_total(recipient_id).await;

        if !co_present {
            let locally_online = self.registry.is_user_connected_locally(recipient_id).await;
            match self
                .pipeline
                .handle_message_sent(conversation, recipient_id, locally_online)
                .await
            {
                Ok(outcome) => {
                    tracing::debug!(conversation_id = %conversation.id, "fallback outcome: {outcome:?}")
                }
                Err(err) => {
                    tracing::error!(conversation_id = %conversation.id, "notification fallback failed: {err}")
                }
            }
        }

        message
    }

    /// Broadcasts a read receipt to the conversation room and a refreshed
    /// unread total to the reader's own connections.
    pub async fn broadcast_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        message_id: Option<Uuid>,
    ) {
        self.bus
            .publish(
                Scope::Conversation(conversation_id),
                ServerEvent::MessageRead {
                    conversation_id,
                    message_id,
                    reader_id,
                },
            )
            .await;
        self.push_unread_total(reader_id).await;
    }

    /// Pushes the user's current total unread count to all their
    /// connections, on every process.
    pub async fn push_unread_total(&self, user_id: Uuid) {
        match self.service.total_unread(user_id).await {
            Ok(total) => {
                self.bus
                    .publish(Scope::User(user_id), ServerEvent::UnreadCountUpdated { total })
                    .await;
            }
            Err(err) => tracing::warn!(%user_id, "unread total lookup failed: {err}"),
        }
    }
}
