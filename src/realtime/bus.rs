//! Cross-process event fan-out.
//!
//! Every server process publishes realtime events to a local broadcast
//! channel; when Redis is configured the event is also PUBLISHed so peer
//! processes can replay it into their own local channels. Each process tags
//! outgoing events with its process id and drops its own events when they
//! come back over the wire, so local subscribers see every event exactly
//! once regardless of which process originated it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::ServerEvent;

const CHANNEL: &str = "salonchat:events";
const LOCAL_CAPACITY: usize = 1024;

/// Who an event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Connections that joined the conversation's room.
    Conversation(Uuid),
    /// Every connection of one user.
    User(Uuid),
    /// Every connection.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub origin: Uuid,
    pub scope: Scope,
    pub event: ServerEvent,
}

#[derive(Clone)]
pub struct EventBus {
    process_id: Uuid,
    local: broadcast::Sender<BusEvent>,
    redis: Option<redis::aio::ConnectionManager>,
}

impl EventBus {
    /// Single-process bus; events never leave this process.
    pub fn in_process() -> Self {
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        Self {
            process_id: Uuid::new_v4(),
            local,
            redis: None,
        }
    }

    /// Bus bridged over Redis pub/sub. Spawns a background task that
    /// subscribes to the shared channel and replays peer events locally,
    /// reconnecting with a delay whenever the subscription drops.
    pub fn with_redis(client: redis::Client, conn: redis::aio::ConnectionManager) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        let bus = Self {
            process_id: Uuid::new_v4(),
            local: local.clone(),
            redis: Some(conn),
        };
        tokio::spawn(pump(client, local, bus.process_id));
        bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.local.subscribe()
    }

    /// Publishes to local subscribers and, when bridged, to peer processes.
    /// Redis failures are logged; local delivery already happened.
    pub async fn publish(&self, scope: Scope, event: ServerEvent) {
        let bus_event = BusEvent {
            origin: self.process_id,
            scope,
            event,
        };
        // No local subscribers is fine (no websocket connections yet).
        let _ = self.local.send(bus_event.clone());

        if let Some(conn) = &self.redis {
            let payload = match serde_json::to_string(&bus_event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!("event serialization failed: {err}");
                    return;
                }
            };
            let mut conn = conn.clone();
            let result: Result<(), redis::RedisError> = redis::cmd("PUBLISH")
                .arg(CHANNEL)
                .arg(payload)
                .query_async(&mut conn)
                .await;
            if let Err(err) = result {
                tracing::warn!("event publish to peers failed: {err}");
            }
        }
    }
}

async fn pump(client: redis::Client, local: broadcast::Sender<BusEvent>, process_id: Uuid) {
    use futures_util::StreamExt;

    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                tracing::warn!("event bus subscribe connection failed: {err}");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };
        if let Err(err) = pubsub.subscribe(CHANNEL).await {
            tracing::warn!("event bus channel subscribe failed: {err}");
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            continue;
        }
        tracing::info!("event bus subscribed to {CHANNEL}");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!("undecodable bus payload: {err}");
                    continue;
                }
            };
            match serde_json::from_str::<BusEvent>(&payload) {
                Ok(event) if event.origin == process_id => {} // our own echo
                Ok(event) => {
                    let _ = local.send(event);
                }
                Err(err) => tracing::warn!("unparseable bus event: {err}"),
            }
        }
        tracing::warn!("event bus subscription dropped, reconnecting");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_subscribers_see_published_events() {
        let bus = EventBus::in_process();
        let mut rx = bus.subscribe();
        bus.publish(Scope::Global, ServerEvent::UserOnline {
            user_id: Uuid::nil(),
        })
        .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.scope, Scope::Global);
        assert!(matches!(event.event, ServerEvent::UserOnline { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::in_process();
        bus.publish(
            Scope::User(Uuid::nil()),
            ServerEvent::UnreadCountUpdated { total: 0 },
        )
        .await;
    }

    #[test]
    fn bus_events_round_trip_through_json() {
        let event = BusEvent {
            origin: Uuid::new_v4(),
            scope: Scope::Conversation(Uuid::new_v4()),
            event: ServerEvent::UserOffline {
                user_id: Uuid::new_v4(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.origin, event.origin);
        assert_eq!(back.scope, event.scope);
    }
}
