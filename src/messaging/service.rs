//! Conversation and message operations.
//!
//! Every mutation goes through [`MessagingService`]; the REST handlers and
//! the realtime gateway are thin callers. Authorization is enforced here
//! (participant checks, salon-only lifecycle operations, author-only
//! deletes) so the two entry points cannot drift apart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ChatError;
use crate::store::{
    ChatStore, Conversation, ConversationStatus, ConversationUpdate, Message, MessageType,
    NewAttachment, NewConversation, NewMessage, NotificationPreference, UserRole,
};

use super::types::{
    ConversationQuery, ConversationSummary, CreateConversationRequest, MessageResponse, Paginated,
    Pagination, SendMessageRequest, UpdateConversationRequest, UpdatePreferencesRequest,
};

const MAX_ATTACHMENTS: usize = 5;
const MAX_ATTACHMENT_BYTES: i64 = 10 * 1024 * 1024;
const ALLOWED_ATTACHMENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn ChatStore>,
}

impl MessagingService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Creates a conversation between a salon and a client, or returns the
    /// existing one when an appointment id is given and already has a
    /// conversation attached.
    pub async fn create_conversation(
        &self,
        initiator_id: Uuid,
        req: CreateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        let initiator = self
            .store
            .get_user(initiator_id)
            .await?
            .ok_or(ChatError::NotFound("user"))?;
        let counterpart = self
            .store
            .get_user(req.counterpart_id)
            .await?
            .ok_or(ChatError::NotFound("user"))?;

        if initiator.role != UserRole::Salon {
            return Err(ChatError::forbidden(
                "only salon accounts can open conversations",
            ));
        }
        if counterpart.role != UserRole::Client {
            return Err(ChatError::bad_request(
                "conversation counterpart must be a client account",
            ));
        }

        if let Some(appointment_id) = req.appointment_id.as_deref() {
            if let Some(existing) = self
                .store
                .find_conversation_by_appointment(appointment_id)
                .await?
            {
                return Ok(existing);
            }
        }

        let conversation = self
            .store
            .insert_conversation(NewConversation {
                salon_id: initiator.id,
                client_user_id: counterpart.id,
                appointment_id: req.appointment_id,
                subject: req.subject,
            })
            .await?;

        if let Some(content) = req.first_message.filter(|c| !c.trim().is_empty()) {
            self.store
                .insert_message(NewMessage {
                    conversation_id: conversation.id,
                    sender_id: initiator.id,
                    content,
                    message_type: MessageType::System,
                    attachments: Vec::new(),
                })
                .await?;
            self.store
                .increment_unread(conversation.id, counterpart.id)
                .await?;
            return Ok(self
                .store
                .get_conversation(conversation.id)
                .await?
                .ok_or(ChatError::NotFound("conversation"))?);
        }

        Ok(conversation)
    }

    /// Loads a conversation and verifies the caller participates in it.
    pub async fn conversation_for_participant(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::NotFound("conversation"))?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::forbidden(
                "not a participant of this conversation",
            ));
        }
        Ok(conversation)
    }

    fn validate_attachments(attachments: &[NewAttachment]) -> Result<(), ChatError> {
        if attachments.len() > MAX_ATTACHMENTS {
            return Err(ChatError::bad_request(format!(
                "at most {MAX_ATTACHMENTS} attachments per message"
            )));
        }
        for attachment in attachments {
            if !ALLOWED_ATTACHMENT_TYPES.contains(&attachment.mime_type.as_str()) {
                return Err(ChatError::bad_request(format!(
                    "unsupported attachment type {}",
                    attachment.mime_type
                )));
            }
            if attachment.size_bytes <= 0 || attachment.size_bytes > MAX_ATTACHMENT_BYTES {
                return Err(ChatError::bad_request(
                    "attachment size must be between 1 byte and 10 MiB",
                ));
            }
        }
        Ok(())
    }

    /// Persists a message from `sender_id` and bumps the counterpart's
    /// unread counter. Delivery and notification fallback are the caller's
    /// concern.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        req: SendMessageRequest,
    ) -> Result<MessageResponse, ChatError> {
        let conversation = self
            .conversation_for_participant(sender_id, conversation_id)
            .await?;

        let content = req.content.trim().to_string();
        if content.is_empty() {
            return Err(ChatError::bad_request("message content must not be empty"));
        }
        Self::validate_attachments(&req.attachments)?;

        let message = self
            .store
            .insert_message(NewMessage {
                conversation_id,
                sender_id,
                content,
                message_type: req.message_type,
                attachments: req.attachments,
            })
            .await?;

        let recipient_id = conversation.counterpart_of(sender_id);
        self.store
            .increment_unread(conversation_id, recipient_id)
            .await?;

        let names = self.display_names(&conversation).await?;
        Ok(Self::resolve(message, &names))
    }

    /// A page of messages, newest first. Reading a page marks every message
    /// on it that the requester did not author as read and clears the
    /// requester's unread state for the conversation.
    pub async fn get_messages(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        pagination: &Pagination,
    ) -> Result<Paginated<MessageResponse>, ChatError> {
        let conversation = self
            .conversation_for_participant(requester_id, conversation_id)
            .await?;

        let (messages, total) = self
            .store
            .list_messages(conversation_id, pagination.page(), pagination.limit())
            .await?;

        self.acknowledge_read(&conversation, requester_id).await?;

        let names = self.display_names(&conversation).await?;
        let now = Utc::now();
        let items = messages
            .into_iter()
            .map(|mut message| {
                if message.sender_id != requester_id && !message.is_read {
                    message.is_read = true;
                    message.read_at = Some(now);
                }
                Self::resolve(message, &names)
            })
            .collect();

        Ok(Paginated {
            items,
            page: pagination.page(),
            limit: pagination.limit(),
            total,
        })
    }

    /// Conversations the user participates in, most recently active first,
    /// each annotated with the user's unread count and a last-message
    /// preview.
    pub async fn get_conversations(
        &self,
        user_id: Uuid,
        query: &ConversationQuery,
    ) -> Result<Paginated<ConversationSummary>, ChatError> {
        let pagination = query.pagination();
        let (conversations, total) = self
            .store
            .list_conversations(user_id, query.status, pagination.page(), pagination.limit())
            .await?;

        let mut items = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = self.store.unread_count(conversation.id, user_id).await?;
            let last_message = match self.store.latest_message(conversation.id).await? {
                Some(message) => {
                    let names = self.display_names(&conversation).await?;
                    Some(Self::resolve(message, &names))
                }
                None => None,
            };
            items.push(ConversationSummary {
                conversation,
                unread_count,
                last_message,
            });
        }

        Ok(Paginated {
            items,
            page: pagination.page(),
            limit: pagination.limit(),
            total,
        })
    }

    /// Marks everything the user has not read in the conversation as read,
    /// resets their counter and withdraws any pending digest email. Returns
    /// the number of messages transitioned.
    pub async fn mark_all_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<u64, ChatError> {
        let conversation = self
            .conversation_for_participant(user_id, conversation_id)
            .await?;
        let marked = self
            .store
            .mark_conversation_read(conversation.id, user_id, Utc::now())
            .await?;
        self.store.reset_unread(conversation.id, user_id).await?;
        self.store
            .delete_pending_notification(conversation.id, user_id)
            .await?;
        Ok(marked)
    }

    async fn acknowledge_read(
        &self,
        conversation: &Conversation,
        user_id: Uuid,
    ) -> Result<(), ChatError> {
        self.store
            .mark_conversation_read(conversation.id, user_id, Utc::now())
            .await?;
        self.store.reset_unread(conversation.id, user_id).await?;
        self.store
            .delete_pending_notification(conversation.id, user_id)
            .await?;
        Ok(())
    }

    /// Marks a single message read. Marking one's own message is a no-op;
    /// the per-conversation counter is left alone, it tracks page reads.
    pub async fn mark_message_read(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<MessageResponse, ChatError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        let conversation = self
            .conversation_for_participant(user_id, message.conversation_id)
            .await?;

        let names = self.display_names(&conversation).await?;
        if message.sender_id == user_id || message.is_read {
            return Ok(Self::resolve(message, &names));
        }

        let read_at = Utc::now();
        self.store.mark_message_read(message_id, read_at).await?;
        let mut message = message;
        message.is_read = true;
        message.read_at = Some(read_at);
        Ok(Self::resolve(message, &names))
    }

    /// Author-only hard delete of a single message.
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Result<(), ChatError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        if message.sender_id != user_id {
            return Err(ChatError::forbidden("only the author can delete a message"));
        }
        self.store.delete_message(message_id).await?;
        Ok(())
    }

    /// Salon-only toggle between ACTIVE and ARCHIVED.
    pub async fn archive_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        let conversation = self
            .conversation_for_participant(user_id, conversation_id)
            .await?;
        if conversation.salon_id != user_id {
            return Err(ChatError::forbidden(
                "only the salon can archive a conversation",
            ));
        }
        let next = match conversation.status {
            ConversationStatus::Active => ConversationStatus::Archived,
            ConversationStatus::Archived => ConversationStatus::Active,
        };
        Ok(self
            .store
            .update_conversation(
                conversation_id,
                ConversationUpdate {
                    subject: None,
                    status: Some(next),
                },
            )
            .await?)
    }

    /// Either participant may retitle or re-status a conversation.
    pub async fn update_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        req: UpdateConversationRequest,
    ) -> Result<Conversation, ChatError> {
        self.conversation_for_participant(user_id, conversation_id)
            .await?;
        Ok(self
            .store
            .update_conversation(
                conversation_id,
                ConversationUpdate {
                    subject: req.subject,
                    status: req.status,
                },
            )
            .await?)
    }

    /// Salon-only hard delete; messages and counters go with it.
    pub async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        let conversation = self
            .conversation_for_participant(user_id, conversation_id)
            .await?;
        if conversation.salon_id != user_id {
            return Err(ChatError::forbidden(
                "only the salon can delete a conversation",
            ));
        }
        self.store.delete_conversation(conversation_id).await?;
        Ok(())
    }

    pub async fn total_unread(&self, user_id: Uuid) -> Result<i64, ChatError> {
        Ok(self.store.total_unread(user_id).await?)
    }

    pub async fn preferences(&self, user_id: Uuid) -> Result<NotificationPreference, ChatError> {
        Ok(self.store.get_or_create_preferences(user_id).await?)
    }

    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        req: UpdatePreferencesRequest,
    ) -> Result<NotificationPreference, ChatError> {
        Ok(self
            .store
            .update_preferences(user_id, req.email_enabled, req.email_frequency)
            .await?)
    }

    /// Mutes or unmutes digest emails for one conversation.
    pub async fn set_conversation_muted(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        muted: bool,
    ) -> Result<(), ChatError> {
        self.conversation_for_participant(user_id, conversation_id)
            .await?;
        self.store
            .set_conversation_muted(user_id, conversation_id, muted)
            .await?;
        Ok(())
    }

    async fn display_names(
        &self,
        conversation: &Conversation,
    ) -> Result<HashMap<Uuid, String>, ChatError> {
        let mut names = HashMap::new();
        for id in [conversation.salon_id, conversation.client_user_id] {
            let name = self
                .store
                .get_user(id)
                .await?
                .map(|u| u.display_name)
                .unwrap_or_else(|| "Unknown".to_string());
            names.insert(id, name);
        }
        Ok(names)
    }

    fn resolve(message: Message, names: &HashMap<Uuid, String>) -> MessageResponse {
        let sender_name = names
            .get(&message.sender_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());
        MessageResponse::from_message(message, sender_name)
    }
}
