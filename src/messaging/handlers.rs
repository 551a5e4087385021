//! REST handlers for the conversation surface.
//!
//! Thin wrappers over [`MessagingService`]; mutations that peers should
//! see immediately also publish to the event bus so REST and websocket
//! clients stay in sync.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ChatError;
use crate::server::state::AppState;

use super::guard::RequestConversation;
use super::types::{
    ConversationQuery, CreateConversationRequest, Pagination, SendMessageRequest,
    UnreadCountResponse, UpdateConversationRequest, UpdatePreferencesRequest,
};

pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state.service.create_conversation(user.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ConversationQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let page = state.service.get_conversations(user.user_id, &query).await?;
    Ok(Json(page))
}

pub async fn get_conversation(
    RequestConversation(conversation): RequestConversation,
) -> impl IntoResponse {
    Json(conversation)
}

pub async fn update_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let updated = state
        .service
        .update_conversation(user.user_id, conversation.id, req)
        .await?;
    Ok(Json(updated))
}

pub async fn archive_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
) -> Result<impl IntoResponse, ChatError> {
    let updated = state
        .service
        .archive_conversation(user.user_id, conversation.id)
        .await?;
    Ok(Json(updated))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
) -> Result<impl IntoResponse, ChatError> {
    state
        .service
        .delete_conversation(user.user_id, conversation.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, ChatError> {
    let page = state
        .service
        .get_messages(user.user_id, conversation.id, &pagination)
        .await?;
    // Reading a page acknowledges everything unread; let the counterpart
    // and the reader's other tabs know.
    state.broadcast_read(conversation.id, user.user_id, None).await;
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state
        .service
        .send_message(user.user_id, conversation.id, req)
        .await?;
    let message = state.fan_out_message(&conversation, message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
) -> Result<impl IntoResponse, ChatError> {
    let marked = state
        .service
        .mark_all_read(user.user_id, conversation.id)
        .await?;
    state.broadcast_read(conversation.id, user.user_id, None).await;
    Ok(Json(json!({ "marked": marked })))
}

pub async fn mute_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
) -> Result<impl IntoResponse, ChatError> {
    state
        .service
        .set_conversation_muted(user.user_id, conversation.id, true)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmute_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    RequestConversation(conversation): RequestConversation,
) -> Result<impl IntoResponse, ChatError> {
    state
        .service
        .set_conversation_muted(user.user_id, conversation.id, false)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state.service.mark_message_read(user.user_id, message_id).await?;
    state
        .broadcast_read(message.conversation_id, user.user_id, Some(message.id))
        .await;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    state.service.delete_message(user.user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ChatError> {
    let total = state.service.total_unread(user.user_id).await?;
    Ok(Json(UnreadCountResponse { total }))
}

pub async fn get_preferences(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ChatError> {
    let prefs = state.service.preferences(user.user_id).await?;
    Ok(Json(prefs))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let prefs = state.service.update_preferences(user.user_id, req).await?;
    Ok(Json(prefs))
}
