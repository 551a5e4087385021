//! Notification email rate limiting.
//!
//! One atomic check-and-set with an expiry, keyed by (conversation,
//! recipient): the first caller inside a window wins the right to open a
//! digest entry, every later caller is told to wait the window out. Backend
//! failures fail open (allow) so a shared-store outage degrades to the odd
//! duplicate email instead of silencing notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const OP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("shared store error: {0}")]
    Backend(String),
    #[error("shared store timeout")]
    Timeout,
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Atomically claims the key if it is not held; returns whether the
    /// claim succeeded. The claim expires after `window`.
    async fn try_acquire(&self, key: &str, window: Duration) -> Result<bool, RateLimitError>;

    /// Unconditionally (re)starts the window for the key.
    async fn record(&self, key: &str, window: Duration) -> Result<(), RateLimitError>;
}

/// In-process backend for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRateLimit {
    windows: Mutex<HashMap<String, Instant>>,
}

impl MemoryRateLimit {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryRateLimit {
    async fn try_acquire(&self, key: &str, window: Duration) -> Result<bool, RateLimitError> {
        let mut windows = self.windows.lock().await;
        match windows.get(key) {
            Some(started) if started.elapsed() < window => Ok(false),
            _ => {
                windows.insert(key.to_string(), Instant::now());
                Ok(true)
            }
        }
    }

    async fn record(&self, key: &str, window: Duration) -> Result<(), RateLimitError> {
        let _ = window;
        self.windows
            .lock()
            .await
            .insert(key.to_string(), Instant::now());
        Ok(())
    }
}

/// Redis backend: `SET NX EX`, the canonical single-key gate.
pub struct RedisRateLimit {
    conn: redis::aio::ConnectionManager,
}

impl RedisRateLimit {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimitBackend for RedisRateLimit {
    async fn try_acquire(&self, key: &str, window: Duration) -> Result<bool, RateLimitError> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(window.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }

    async fn record(&self, key: &str, window: Duration) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("EX")
            .arg(window.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Fail-open wrapper deciding whether another digest email may be opened
/// for a (conversation, recipient) pair.
#[derive(Clone)]
pub struct NotificationRateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    window: Duration,
}

impl NotificationRateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>, window: Duration) -> Self {
        Self { backend, window }
    }

    fn key(conversation_id: Uuid, recipient_id: Uuid) -> String {
        format!("notify-rate:{conversation_id}:{recipient_id}")
    }

    /// Whether a new notification may be opened now. Claims the window as a
    /// side effect, so two concurrent callers cannot both pass.
    pub async fn can_send(&self, conversation_id: Uuid, recipient_id: Uuid) -> bool {
        let key = Self::key(conversation_id, recipient_id);
        let attempt = tokio::time::timeout(
            OP_TIMEOUT,
            self.backend.try_acquire(&key, self.window),
        )
        .await
        .map_err(|_| RateLimitError::Timeout)
        .and_then(|r| r);
        match attempt {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::warn!(%conversation_id, %recipient_id, "rate limit check failed, allowing: {err}");
                true
            }
        }
    }

    /// Restarts the window after an email actually went out.
    pub async fn record_send(&self, conversation_id: Uuid, recipient_id: Uuid) {
        let key = Self::key(conversation_id, recipient_id);
        let attempt = tokio::time::timeout(OP_TIMEOUT, self.backend.record(&key, self.window))
            .await
            .map_err(|_| RateLimitError::Timeout)
            .and_then(|r| r);
        if let Err(err) = attempt {
            tracing::warn!(%conversation_id, %recipient_id, "rate limit record failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window: Duration) -> NotificationRateLimiter {
        NotificationRateLimiter::new(Arc::new(MemoryRateLimit::new()), window)
    }

    #[tokio::test]
    async fn second_attempt_inside_window_is_denied() {
        let limiter = limiter(Duration::from_secs(60));
        let (conv, user) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.can_send(conv, user).await);
        assert!(!limiter.can_send(conv, user).await);
    }

    #[tokio::test]
    async fn different_pairs_do_not_interfere() {
        let limiter = limiter(Duration::from_secs(60));
        let conv = Uuid::new_v4();
        assert!(limiter.can_send(conv, Uuid::new_v4()).await);
        assert!(limiter.can_send(conv, Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn window_expiry_reopens_the_gate() {
        let limiter = limiter(Duration::from_millis(20));
        let (conv, user) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.can_send(conv, user).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.can_send(conv, user).await);
    }

    struct BrokenBackend;

    #[async_trait]
    impl RateLimitBackend for BrokenBackend {
        async fn try_acquire(&self, _: &str, _: Duration) -> Result<bool, RateLimitError> {
            Err(RateLimitError::Backend("down".into()))
        }
        async fn record(&self, _: &str, _: Duration) -> Result<(), RateLimitError> {
            Err(RateLimitError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn fails_open_when_backend_is_down() {
        let limiter =
            NotificationRateLimiter::new(Arc::new(BrokenBackend), Duration::from_secs(60));
        assert!(limiter.can_send(Uuid::new_v4(), Uuid::new_v4()).await);
    }
}
