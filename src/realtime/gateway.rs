//! Websocket gateway.
//!
//! One task pair per connection: the inbound loop parses client events and
//! drives the messaging service, the outbound task drains the connection's
//! event queue and keeps the socket alive with pings. Authentication
//! happens at handshake time from a `?token=` query parameter or a bearer
//! header; unauthenticated upgrades are refused outright.
//!
//! A failing client event produces an `error` event on that connection,
//! never a disconnect.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{authenticate, bearer_token};
use crate::error::ChatError;
use crate::messaging::types::{Pagination, SendMessageRequest};
use crate::server::state::AppState;
use crate::store::MessageType;

use super::bus::Scope;
use super::events::{ClientEvent, ServerEvent};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);
    let token = query.token.or(header_token);

    let Some(user) = token
        .as_deref()
        .and_then(|t| authenticate(t, &state.config.jwt_secret))
    else {
        tracing::warn!("websocket handshake without a valid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, user.user_id))
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: Uuid) {
    let conn_id = Uuid::new_v4();
    tracing::info!(%user_id, %conn_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_CAPACITY);

    state.registry.register(conn_id, user_id, tx.clone()).await;
    if state.presence.mark_online(user_id, conn_id).await {
        state
            .bus
            .publish(Scope::Global, ServerEvent::UserOnline { user_id })
            .await;
    }

    // The client wants its badge right away, before any event arrives.
    match state.service.total_unread(user_id).await {
        Ok(total) => {
            let _ = tx.send(ServerEvent::UnreadCountUpdated { total }).await;
        }
        Err(err) => tracing::warn!(%user_id, "initial unread push failed: {err}"),
    }

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::error!("outbound event serialization failed: {err}");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&state, conn_id, user_id, &tx, event).await,
                Err(err) => {
                    send_error(&tx, format!("unrecognized event: {err}")).await;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {} // pings, pongs and binary frames carry no events
            Err(err) => {
                tracing::debug!(%conn_id, "websocket read error: {err}");
                break;
            }
        }
    }

    state.registry.unregister(conn_id).await;
    if state.presence.remove_connection(user_id, conn_id).await {
        state
            .bus
            .publish(Scope::Global, ServerEvent::UserOffline { user_id })
            .await;
    }
    send_task.abort();
    tracing::info!(%user_id, %conn_id, "websocket disconnected");
}

async fn handle_client_event(
    state: &AppState,
    conn_id: Uuid,
    user_id: Uuid,
    tx: &mpsc::Sender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            match state
                .service
                .get_messages(user_id, conversation_id, &Pagination::default())
                .await
            {
                Ok(page) => {
                    state.registry.join_room(conn_id, conversation_id).await;
                    let _ = tx
                        .send(ServerEvent::ConversationHistory {
                            conversation_id,
                            messages: page.items,
                            page: page.page,
                            total: page.total,
                        })
                        .await;
                    // Joining reads the latest page, so the counterpart gets
                    // a receipt and the user's other tabs a fresh badge.
                    state.broadcast_read(conversation_id, user_id, None).await;
                }
                Err(err) => send_chat_error(tx, &err).await,
            }
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            state.registry.leave_room(conn_id, conversation_id).await;
            match state.service.mark_all_read(user_id, conversation_id).await {
                Ok(_) => state.broadcast_read(conversation_id, user_id, None).await,
                Err(err) => send_chat_error(tx, &err).await,
            }
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            message_type,
            attachments,
        } => {
            let conversation = match state
                .service
                .conversation_for_participant(user_id, conversation_id)
                .await
            {
                Ok(conversation) => conversation,
                Err(err) => return send_chat_error(tx, &err).await,
            };
            let req = SendMessageRequest {
                content,
                message_type: message_type.unwrap_or(MessageType::Text),
                attachments,
            };
            match state.service.send_message(user_id, conversation_id, req).await {
                Ok(message) => {
                    state.fan_out_message(&conversation, message).await;
                }
                Err(err) => send_chat_error(tx, &err).await,
            }
        }
        ClientEvent::MarkAsRead { message_id } => {
            match state.service.mark_message_read(user_id, message_id).await {
                Ok(message) => {
                    state
                        .broadcast_read(message.conversation_id, user_id, Some(message.id))
                        .await;
                }
                Err(err) => send_chat_error(tx, &err).await,
            }
        }
        ClientEvent::MarkConversationAsRead { conversation_id } => {
            match state.service.mark_all_read(user_id, conversation_id).await {
                Ok(_) => state.broadcast_read(conversation_id, user_id, None).await,
                Err(err) => send_chat_error(tx, &err).await,
            }
        }
        ClientEvent::UserTyping { conversation_id } => {
            typing(state, tx, user_id, conversation_id, true).await;
        }
        ClientEvent::UserStoppedTyping { conversation_id } => {
            typing(state, tx, user_id, conversation_id, false).await;
        }
    }
}

/// Typing indicators are transient: participant-checked, broadcast to the
/// room, never persisted.
async fn typing(
    state: &AppState,
    tx: &mpsc::Sender<ServerEvent>,
    user_id: Uuid,
    conversation_id: Uuid,
    started: bool,
) {
    if let Err(err) = state
        .service
        .conversation_for_participant(user_id, conversation_id)
        .await
    {
        return send_chat_error(tx, &err).await;
    }
    let event = if started {
        ServerEvent::UserTyping {
            conversation_id,
            user_id,
        }
    } else {
        ServerEvent::UserStoppedTyping {
            conversation_id,
            user_id,
        }
    };
    state
        .bus
        .publish(Scope::Conversation(conversation_id), event)
        .await;
}

async fn send_error(tx: &mpsc::Sender<ServerEvent>, message: String) {
    let _ = tx.send(ServerEvent::Error { message }).await;
}

async fn send_chat_error(tx: &mpsc::Sender<ServerEvent>, err: &ChatError) {
    send_error(tx, err.to_string()).await;
}
