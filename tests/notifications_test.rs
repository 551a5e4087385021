//! Offline email fallback: accumulation into one digest, the rate window,
//! withdrawal on read and terminal failure handling.

mod common;

use common::{test_env, MockMailer, TestEnv, RATE_WINDOW};
use std::sync::Arc;
use uuid::Uuid;

use salonchat::messaging::types::{CreateConversationRequest, Pagination, SendMessageRequest};
use salonchat::notifications::{FallbackOutcome, NotificationFlushWorker};
use salonchat::store::{ChatStore, Conversation, MessageType, QueueStatus};

async fn conversation_for(env: &TestEnv) -> Conversation {
    env.service
        .create_conversation(
            env.salon,
            CreateConversationRequest {
                counterpart_id: env.client,
                appointment_id: None,
                subject: Some("Color refresh".into()),
                first_message: None,
            },
        )
        .await
        .unwrap()
}

/// Sends a message from the salon and runs the fallback decision for the
/// offline client.
async fn send_offline(env: &TestEnv, conversation: &Conversation, content: &str) -> FallbackOutcome {
    env.service
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
    env.pipeline
        .handle_message_sent(conversation, env.client, false)
        .await
        .unwrap()
}

fn worker(env: &TestEnv, mailer: Arc<MockMailer>) -> NotificationFlushWorker {
    let store: Arc<dyn ChatStore> = env.store.clone();
    NotificationFlushWorker::new(store, mailer, env.limiter.clone())
}

#[tokio::test]
async fn offline_messages_batch_into_one_digest() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    assert!(matches!(
        send_offline(&env, &conversation, "Running 10 minutes late").await,
        FallbackOutcome::Queued(_)
    ));
    assert!(matches!(
        send_offline(&env, &conversation, "Make that 15").await,
        FallbackOutcome::Accumulated(_)
    ));
    assert!(matches!(
        send_offline(&env, &conversation, "Here now!").await,
        FallbackOutcome::Accumulated(_)
    ));

    let mailer = MockMailer::new();
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);

    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].subject, "3 new messages from Chez Nova");
    assert!(sent[0].html.contains("Here now!"));

    // Nothing left pending, and a second pass sends nothing.
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
    drop(sent);
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(mailer.sent_count().await, 1);
}

#[tokio::test]
async fn online_recipient_never_queues() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;
    env.presence.mark_online(env.client, Uuid::new_v4()).await;

    assert!(matches!(
        send_offline(&env, &conversation, "hello").await,
        FallbackOutcome::RecipientOnline
    ));
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_window_blocks_then_reopens() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    assert!(matches!(
        send_offline(&env, &conversation, "first").await,
        FallbackOutcome::Queued(_)
    ));
    let mailer = MockMailer::new();
    worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(mailer.sent_count().await, 1);

    // Inside the window a new entry cannot open.
    assert!(matches!(
        send_offline(&env, &conversation, "second").await,
        FallbackOutcome::RateLimited
    ));

    // After the window expires the gate reopens.
    tokio::time::sleep(RATE_WINDOW + RATE_WINDOW).await;
    assert!(matches!(
        send_offline(&env, &conversation, "third").await,
        FallbackOutcome::Queued(_)
    ));
    worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(mailer.sent_count().await, 2);
}

#[tokio::test]
async fn reading_withdraws_the_pending_digest() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    assert!(matches!(
        send_offline(&env, &conversation, "see you soon").await,
        FallbackOutcome::Queued(_)
    ));

    // The client opens the conversation before the flush runs.
    env.service
        .get_messages(env.client, conversation.id, &Pagination::default())
        .await
        .unwrap();

    let mailer = MockMailer::new();
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(mailer.sent_count().await, 0);
}

#[tokio::test]
async fn muted_and_disabled_recipients_get_nothing() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    env.store
        .set_conversation_muted(env.client, conversation.id, true)
        .await
        .unwrap();
    assert!(matches!(
        send_offline(&env, &conversation, "muted").await,
        FallbackOutcome::Muted
    ));

    env.store
        .set_conversation_muted(env.client, conversation.id, false)
        .await
        .unwrap();
    env.store
        .update_preferences(env.client, Some(false), None)
        .await
        .unwrap();
    assert!(matches!(
        send_offline(&env, &conversation, "disabled").await,
        FallbackOutcome::Disabled
    ));
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_sends_are_terminal() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    assert!(matches!(
        send_offline(&env, &conversation, "doomed").await,
        FallbackOutcome::Queued(_)
    ));

    let mailer = MockMailer::new();
    mailer.fail_next_with("smtp 550 rejected").await;
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.sent, 0);

    // The entry carries the reason and is never picked up again.
    let entries = env.store.queue_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, QueueStatus::Failed);
    assert_eq!(entries[0].failure_reason.as_deref(), Some("email send failed: smtp 550 rejected"));
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.sent + report.failed, 0);
    assert_eq!(mailer.sent_count().await, 0);
}

#[tokio::test]
async fn opting_out_after_queueing_drops_the_entry() {
    let env = test_env().await;
    let conversation = conversation_for(&env).await;

    assert!(matches!(
        send_offline(&env, &conversation, "queued then opted out").await,
        FallbackOutcome::Queued(_)
    ));
    env.store
        .update_preferences(env.client, Some(false), None)
        .await
        .unwrap();

    let mailer = MockMailer::new();
    let report = worker(&env, mailer.clone()).flush_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(mailer.sent_count().await, 0);
    assert!(env.store.pending_notifications(10).await.unwrap().is_empty());
}
