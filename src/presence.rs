//! Distributed presence tracking.
//!
//! A user is online while at least one of their connections (tab, device)
//! is registered. The set of connection ids per user lives in the shared
//! store with a bounded expiry so every server process sees the same
//! answer; online/offline transitions are decided from the post-mutation
//! set cardinality, which makes the "last remover wins" race safe.
//!
//! All checks fail open: if the shared store is unreachable the user is
//! treated as online (suppressing notification emails is cheaper to recover
//! from than flooding), and bookkeeping failures are logged, never fatal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Upper bound on any shared-store round trip.
const OP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("shared store error: {0}")]
    Backend(String),
    #[error("shared store timeout")]
    Timeout,
}

impl From<redis::RedisError> for PresenceError {
    fn from(err: redis::RedisError) -> Self {
        PresenceError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait PresenceBackend: Send + Sync {
    /// Adds a connection id to the user's set and refreshes the set expiry.
    /// Returns the post-mutation cardinality.
    async fn add_connection(
        &self,
        user_id: Uuid,
        conn_id: Uuid,
        ttl: Duration,
    ) -> Result<u64, PresenceError>;

    /// Removes one connection id. Returns the remaining cardinality.
    async fn remove_connection(&self, user_id: Uuid, conn_id: Uuid) -> Result<u64, PresenceError>;

    async fn connection_count(&self, user_id: Uuid) -> Result<u64, PresenceError>;
}

/// In-process backend for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryPresence {
    sets: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceBackend for MemoryPresence {
    async fn add_connection(
        &self,
        user_id: Uuid,
        conn_id: Uuid,
        _ttl: Duration,
    ) -> Result<u64, PresenceError> {
        let mut sets = self.sets.lock().await;
        let set = sets.entry(user_id).or_default();
        set.insert(conn_id);
        Ok(set.len() as u64)
    }

    async fn remove_connection(&self, user_id: Uuid, conn_id: Uuid) -> Result<u64, PresenceError> {
        let mut sets = self.sets.lock().await;
        let remaining = match sets.get_mut(&user_id) {
            Some(set) => {
                set.remove(&conn_id);
                set.len() as u64
            }
            None => 0,
        };
        if remaining == 0 {
            sets.remove(&user_id);
        }
        Ok(remaining)
    }

    async fn connection_count(&self, user_id: Uuid) -> Result<u64, PresenceError> {
        Ok(self
            .sets
            .lock()
            .await
            .get(&user_id)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }
}

/// Redis-backed presence: one set per user, expiry refreshed on connect.
pub struct RedisPresence {
    conn: redis::aio::ConnectionManager,
}

impl RedisPresence {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(user_id: Uuid) -> String {
        format!("presence:{user_id}")
    }
}

#[async_trait]
impl PresenceBackend for RedisPresence {
    async fn add_connection(
        &self,
        user_id: Uuid,
        conn_id: Uuid,
        ttl: Duration,
    ) -> Result<u64, PresenceError> {
        let key = Self::key(user_id);
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .sadd(&key, conn_id.to_string())
            .ignore()
            .expire(&key, ttl.as_secs() as i64)
            .ignore()
            .scard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn remove_connection(&self, user_id: Uuid, conn_id: Uuid) -> Result<u64, PresenceError> {
        let key = Self::key(user_id);
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .srem(&key, conn_id.to_string())
            .ignore()
            .scard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn connection_count(&self, user_id: Uuid) -> Result<u64, PresenceError> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("SCARD")
            .arg(Self::key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Fail-open wrapper around a [`PresenceBackend`].
#[derive(Clone)]
pub struct PresenceTracker {
    backend: Arc<dyn PresenceBackend>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn PresenceBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    async fn run<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, PresenceError>>,
    ) -> Result<T, PresenceError> {
        tokio::time::timeout(OP_TIMEOUT, fut)
            .await
            .map_err(|_| PresenceError::Timeout)?
    }

    /// Registers a connection. Returns `true` only on the offline→online
    /// transition (first connection); bookkeeping failures are logged and
    /// reported as "no transition".
    pub async fn mark_online(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        match self
            .run(self.backend.add_connection(user_id, conn_id, self.ttl))
            .await
        {
            Ok(count) => count == 1,
            Err(err) => {
                tracing::warn!(%user_id, "presence add failed: {err}");
                false
            }
        }
    }

    /// Removes a connection. Returns `true` only when the user's set became
    /// empty, i.e. the user is now fully offline.
    pub async fn remove_connection(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        match self
            .run(self.backend.remove_connection(user_id, conn_id))
            .await
        {
            Ok(remaining) => remaining == 0,
            Err(err) => {
                tracing::warn!(%user_id, "presence remove failed: {err}");
                false
            }
        }
    }

    /// Whether the user has any live connection anywhere. Fails open.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        match self.run(self.backend.connection_count(user_id)).await {
            Ok(count) => count > 0,
            Err(err) => {
                tracing::warn!(%user_id, "presence check failed, assuming online: {err}");
                true
            }
        }
    }

    /// Batch variant of [`is_online`](Self::is_online). Fails open per user.
    pub async fn online_subset(&self, user_ids: &[Uuid]) -> HashSet<Uuid> {
        let mut online = HashSet::new();
        for &user_id in user_ids {
            if self.is_online(user_id).await {
                online.insert(user_id);
            }
        }
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Arc::new(MemoryPresence::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn transitions_only_at_the_edges() {
        let tracker = tracker();
        let user = Uuid::new_v4();
        let (tab_a, tab_b) = (Uuid::new_v4(), Uuid::new_v4());

        // First connection: offline -> online.
        assert!(tracker.mark_online(user, tab_a).await);
        // Second tab: no transition.
        assert!(!tracker.mark_online(user, tab_b).await);
        assert!(tracker.is_online(user).await);

        // Removing a non-last connection never reports offline.
        assert!(!tracker.remove_connection(user, tab_a).await);
        assert!(tracker.is_online(user).await);

        // Last removal flips the user fully offline.
        assert!(tracker.remove_connection(user, tab_b).await);
        assert!(!tracker.is_online(user).await);
    }

    #[tokio::test]
    async fn unknown_user_is_offline() {
        let tracker = tracker();
        assert!(!tracker.is_online(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn online_subset_filters() {
        let tracker = tracker();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.mark_online(a, Uuid::new_v4()).await;
        let online = tracker.online_subset(&[a, b]).await;
        assert!(online.contains(&a));
        assert!(!online.contains(&b));
    }

    struct BrokenBackend;

    #[async_trait]
    impl PresenceBackend for BrokenBackend {
        async fn add_connection(&self, _: Uuid, _: Uuid, _: Duration) -> Result<u64, PresenceError> {
            Err(PresenceError::Backend("down".into()))
        }
        async fn remove_connection(&self, _: Uuid, _: Uuid) -> Result<u64, PresenceError> {
            Err(PresenceError::Backend("down".into()))
        }
        async fn connection_count(&self, _: Uuid) -> Result<u64, PresenceError> {
            Err(PresenceError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn checks_fail_open_when_backend_is_down() {
        let tracker = PresenceTracker::new(Arc::new(BrokenBackend), Duration::from_secs(60));
        let user = Uuid::new_v4();
        // Bookkeeping errors are swallowed (no transition events)...
        assert!(!tracker.mark_online(user, Uuid::new_v4()).await);
        assert!(!tracker.remove_connection(user, Uuid::new_v4()).await);
        // ...but reachability checks treat the user as online.
        assert!(tracker.is_online(user).await);
    }
}
