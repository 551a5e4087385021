//! Local connection registry.
//!
//! Tracks every websocket connection on this process: who owns it, which
//! conversation rooms it has joined and the sender half of its outbound
//! queue. The registry answers the gateway's routing questions (which
//! connections get a bus event) and the fast-path presence question "is
//! this user connected to *this* process".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::bus::{BusEvent, Scope};
use super::events::ServerEvent;

struct ConnectionEntry {
    user_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, ConnectionEntry>,
    user_connections: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn_id: Uuid, user_id: Uuid, sender: mpsc::Sender<ServerEvent>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        inner
            .user_connections
            .entry(user_id)
            .or_default()
            .insert(conn_id);
    }

    pub async fn unregister(&self, conn_id: Uuid) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&conn_id)?;
        if let Some(conns) = inner.user_connections.get_mut(&entry.user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.user_connections.remove(&entry.user_id);
            }
        }
        Some(entry.user_id)
    }

    pub async fn join_room(&self, conn_id: Uuid, conversation_id: Uuid) {
        if let Some(entry) = self.inner.write().await.connections.get_mut(&conn_id) {
            entry.rooms.insert(conversation_id);
        }
    }

    pub async fn leave_room(&self, conn_id: Uuid, conversation_id: Uuid) {
        if let Some(entry) = self.inner.write().await.connections.get_mut(&conn_id) {
            entry.rooms.remove(&conversation_id);
        }
    }

    /// Whether any of the user's connections on this process has the
    /// conversation open. Drives the co-presence read fast path.
    pub async fn is_user_in_room(&self, user_id: Uuid, conversation_id: Uuid) -> bool {
        let inner = self.inner.read().await;
        let Some(conns) = inner.user_connections.get(&user_id) else {
            return false;
        };
        conns.iter().any(|conn_id| {
            inner
                .connections
                .get(conn_id)
                .is_some_and(|e| e.rooms.contains(&conversation_id))
        })
    }

    /// Whether the user has any connection on this process. A cheaper local
    /// check than the shared presence store; `false` proves nothing about
    /// other processes.
    pub async fn is_user_connected_locally(&self, user_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .user_connections
            .contains_key(&user_id)
    }

    /// Routes a bus event to the local connections its scope selects.
    /// Slow consumers (full outbound queue) drop the event with a warning
    /// rather than stalling delivery for everyone else.
    pub async fn deliver(&self, event: &BusEvent) {
        let inner = self.inner.read().await;
        let targets = inner.connections.iter().filter(|(_, entry)| match event.scope {
            Scope::Conversation(id) => entry.rooms.contains(&id),
            Scope::User(id) => entry.user_id == id,
            Scope::Global => true,
        });
        for (conn_id, entry) in targets {
            if let Err(err) = entry.sender.try_send(event.event.clone()) {
                tracing::warn!(%conn_id, "dropping event for slow connection: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(scope: Scope) -> BusEvent {
        BusEvent {
            origin: Uuid::new_v4(),
            scope,
            event: ServerEvent::UnreadCountUpdated { total: 1 },
        }
    }

    #[tokio::test]
    async fn room_scoped_events_reach_only_joined_connections() {
        let registry = SessionRegistry::new();
        let conversation = Uuid::new_v4();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        registry.register(conn_a, user_a, tx_a).await;
        registry.register(conn_b, user_b, tx_b).await;
        registry.join_room(conn_a, conversation).await;

        registry.deliver(&event(Scope::Conversation(conversation))).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_scoped_events_reach_all_tabs_of_that_user() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(conn_a, user, tx_a).await;
        registry.register(conn_b, user, tx_b).await;

        registry.deliver(&event(Scope::User(user))).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_cleans_user_and_room_state() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);

        registry.register(conn, user, tx).await;
        registry.join_room(conn, conversation).await;
        assert!(registry.is_user_connected_locally(user).await);
        assert!(registry.is_user_in_room(user, conversation).await);

        assert_eq!(registry.unregister(conn).await, Some(user));
        assert!(!registry.is_user_connected_locally(user).await);
        assert!(!registry.is_user_in_room(user, conversation).await);
        assert_eq!(registry.unregister(conn).await, None);
    }

    #[tokio::test]
    async fn leave_room_stops_room_delivery() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);

        registry.register(conn, user, tx).await;
        registry.join_room(conn, conversation).await;
        registry.leave_room(conn, conversation).await;

        registry.deliver(&event(Scope::Conversation(conversation))).await;
        assert!(rx.try_recv().is_err());
    }
}
