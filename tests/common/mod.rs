//! Shared fixtures: a seeded in-memory store, service and pipeline
//! builders and a recording mailer.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use salonchat::messaging::MessagingService;
use salonchat::notifications::{Mailer, MailerError, NotificationPipeline};
use salonchat::presence::{MemoryPresence, PresenceTracker};
use salonchat::ratelimit::{MemoryRateLimit, NotificationRateLimiter};
use salonchat::store::{ChatStore, MemoryStore, UserRecord, UserRole};

pub const RATE_WINDOW: Duration = Duration::from_millis(200);

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub service: MessagingService,
    pub presence: PresenceTracker,
    pub limiter: NotificationRateLimiter,
    pub pipeline: NotificationPipeline,
    pub salon: Uuid,
    pub client: Uuid,
}

/// One salon, one client, everything in-memory, a short rate window so
/// expiry is testable.
pub async fn test_env() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let salon = Uuid::new_v4();
    let client = Uuid::new_v4();
    store
        .insert_user(UserRecord {
            id: salon,
            display_name: "Chez Nova".into(),
            email: "bookings@cheznova.example".into(),
            role: UserRole::Salon,
        })
        .await;
    store
        .insert_user(UserRecord {
            id: client,
            display_name: "Ada Marsh".into(),
            email: "ada@example.com".into(),
            role: UserRole::Client,
        })
        .await;

    let chat_store: Arc<dyn ChatStore> = store.clone();
    let presence = PresenceTracker::new(Arc::new(MemoryPresence::new()), Duration::from_secs(60));
    let limiter = NotificationRateLimiter::new(Arc::new(MemoryRateLimit::new()), RATE_WINDOW);
    let pipeline =
        NotificationPipeline::new(chat_store.clone(), presence.clone(), limiter.clone());

    TestEnv {
        service: MessagingService::new(chat_store),
        store,
        presence,
        limiter,
        pipeline,
        salon,
        client,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Mailer that records every send; can be flipped to fail.
#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail_with: Mutex<Option<String>>,
}

impl MockMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail_next_with(&self, reason: &str) {
        *self.fail_with.lock().await = Some(reason.to_string());
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, MailerError> {
        if let Some(reason) = self.fail_with.lock().await.take() {
            return Err(MailerError::Send(reason));
        }
        self.sent.lock().await.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok("250 ok".to_string())
    }
}
