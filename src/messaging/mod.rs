//! Conversation domain: the service layer shared by the REST handlers and
//! the realtime gateway, plus the conversation-scoped request guard.

pub mod guard;
pub mod handlers;
pub mod service;
pub mod types;

pub use guard::{conversation_guard, RequestConversation};
pub use service::MessagingService;
