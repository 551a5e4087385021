//! Delivery fan-out: co-present recipients get messages pre-read, locally
//! connected recipients get counter pushes without emails, fully offline
//! recipients fall through to the digest queue.

mod common;

use common::{test_env, TestEnv};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use salonchat::config::AppConfig;
use salonchat::messaging::types::{CreateConversationRequest, SendMessageRequest};
use salonchat::realtime::{EventBus, ServerEvent, SessionRegistry};
use salonchat::server::AppState;
use salonchat::store::{ChatStore, Conversation, MessageType};

async fn app_state(env: &TestEnv) -> AppState {
    let bus = EventBus::in_process();
    let registry = SessionRegistry::new();

    // The dispatcher pump normally started by app assembly.
    {
        let registry = registry.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                registry.deliver(&event).await;
            }
        });
    }

    let store: Arc<dyn ChatStore> = env.store.clone();
    AppState {
        config: Arc::new(AppConfig::default()),
        store,
        service: env.service.clone(),
        registry,
        presence: env.presence.clone(),
        bus,
        pipeline: env.pipeline.clone(),
    }
}

async fn conversation_for(env: &TestEnv) -> Conversation {
    env.service
        .create_conversation(
            env.salon,
            CreateConversationRequest {
                counterpart_id: env.client,
                appointment_id: None,
                subject: None,
                first_message: None,
            },
        )
        .await
        .unwrap()
}

async fn send(state: &AppState, env: &TestEnv, conversation: &Conversation, content: &str) {
    let message = env
        .service
        .send_message(
            env.salon,
            conversation.id,
            SendMessageRequest {
                content: content.into(),
                message_type: MessageType::Text,
                attachments: Vec::new(),
            },
        )
        .await
        .unwrap();
    state.fan_out_message(conversation, message).await;
}

async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn co_present_recipient_gets_the_message_already_read() {
    let env = test_env().await;
    let state = app_state(&env).await;
    let conversation = conversation_for(&env).await;

    let conn = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(16);
    state.registry.register(conn, env.client, tx).await;
    state.registry.join_room(conn, conversation.id).await;

    send(&state, &env, &conversation, "you're up next").await;

    let event = next_event(&mut rx).await;
    match event {
        ServerEvent::NewMessage { message } => {
            assert_eq!(message.content, "you're up next");
            assert!(message.is_read, "co-present delivery is pre-read");
        }
        other => panic!("expected new-message, got {other:?}"),
    }

    // Counter stays clear and no digest is owed.
    assert_eq!(env.service.total_unread(env.client).await.unwrap(), 0);
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn connected_but_elsewhere_gets_counter_push_and_no_email() {
    let env = test_env().await;
    let state = app_state(&env).await;
    let conversation = conversation_for(&env).await;

    // Client is connected but has not joined this conversation's room.
    let conn = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(16);
    state.registry.register(conn, env.client, tx).await;

    send(&state, &env, &conversation, "ping").await;

    let event = next_event(&mut rx).await;
    match event {
        ServerEvent::UnreadCountUpdated { total } => assert_eq!(total, 1),
        other => panic!("expected unread-count-updated, got {other:?}"),
    }
    assert_eq!(env.service.total_unread(env.client).await.unwrap(), 1);
    // Locally connected: the fallback never queues an email.
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn fully_offline_recipient_falls_back_to_the_queue() {
    let env = test_env().await;
    let state = app_state(&env).await;
    let conversation = conversation_for(&env).await;

    send(&state, &env, &conversation, "are you there?").await;

    let pending = env.store.pending_notifications(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipient_id, env.client);
    assert_eq!(pending[0].message_count, 1);
    assert_eq!(env.service.total_unread(env.client).await.unwrap(), 1);
}

#[tokio::test]
async fn sender_tabs_in_the_room_see_the_message_too() {
    let env = test_env().await;
    let state = app_state(&env).await;
    let conversation = conversation_for(&env).await;

    let conn = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(16);
    state.registry.register(conn, env.salon, tx).await;
    state.registry.join_room(conn, conversation.id).await;

    send(&state, &env, &conversation, "note to both sides").await;

    let event = next_event(&mut rx).await;
    assert!(matches!(event, ServerEvent::NewMessage { .. }));
}
