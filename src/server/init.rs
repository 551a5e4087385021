//! Wires the application together from configuration.
//!
//! Every external service is optional: without DATABASE_URL the store is
//! in-memory, without REDIS_URL presence/rate limiting/event fan-out stay
//! in-process, without SMTP credentials digests are logged. Missing pieces
//! are warned about once at startup; the server always comes up.

use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;
use crate::jobs::ArchivalJob;
use crate::messaging::MessagingService;
use crate::notifications::{
    LogMailer, Mailer, NotificationFlushWorker, NotificationPipeline, SmtpMailer,
};
use crate::presence::{MemoryPresence, PresenceBackend, PresenceTracker, RedisPresence};
use crate::ratelimit::{MemoryRateLimit, NotificationRateLimiter, RateLimitBackend, RedisRateLimit};
use crate::realtime::{EventBus, SessionRegistry};
use crate::routes;
use crate::store::{ChatStore, MemoryStore, PgStore, UserRecord, UserRole};

use super::state::AppState;

/// Builds the router and spawns the background tasks (event dispatcher,
/// digest flush worker, retention sweep).
pub async fn create_app(config: AppConfig) -> Result<Router, Box<dyn std::error::Error>> {
    let config = Arc::new(config);

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("connected to postgres, migrations applied");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is not persisted)");
            let store = MemoryStore::new();
            seed_dev_users(&store, &config).await;
            Arc::new(store)
        }
    };

    let redis = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let manager = client.get_connection_manager().await?;
            tracing::info!("connected to redis");
            Some((client, manager))
        }
        None => {
            tracing::warn!(
                "REDIS_URL not set, presence and event fan-out are limited to this process"
            );
            None
        }
    };

    let presence_backend: Arc<dyn PresenceBackend> = match &redis {
        Some((_, manager)) => Arc::new(RedisPresence::new(manager.clone())),
        None => Arc::new(MemoryPresence::new()),
    };
    let presence = PresenceTracker::new(presence_backend, config.presence_ttl);

    let ratelimit_backend: Arc<dyn RateLimitBackend> = match &redis {
        Some((_, manager)) => Arc::new(RedisRateLimit::new(manager.clone())),
        None => Arc::new(MemoryRateLimit::new()),
    };
    let limiter = NotificationRateLimiter::new(ratelimit_backend, config.rate_limit_window);

    let bus = match redis {
        Some((client, manager)) => EventBus::with_redis(client, manager),
        None => EventBus::in_process(),
    };

    let registry = SessionRegistry::new();
    let service = MessagingService::new(store.clone());
    let pipeline = NotificationPipeline::new(store.clone(), presence.clone(), limiter.clone());

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
        None => Arc::new(LogMailer),
    };
    NotificationFlushWorker::new(store.clone(), mailer, limiter.clone())
        .spawn(config.notification_flush_interval);

    ArchivalJob::new(store.clone(), config.retention_days, config.hard_delete_days).spawn();

    // Pump bus events into the local connection registry.
    {
        let registry = registry.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => registry.deliver(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event dispatcher lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let state = AppState {
        config,
        store,
        service,
        registry,
        presence,
        bus,
        pipeline,
    };

    Ok(routes::create_router(state))
}

/// Database-less runs get a salon and a client to poke at; their bearer
/// tokens are printed so curl and websocket clients work immediately.
async fn seed_dev_users(store: &MemoryStore, config: &AppConfig) {
    let seeds = [
        ("Dev Salon", "salon@dev.local", UserRole::Salon),
        ("Dev Client", "client@dev.local", UserRole::Client),
    ];
    for (display_name, email, role) in seeds {
        let id = uuid::Uuid::new_v4();
        store
            .insert_user(UserRecord {
                id,
                display_name: display_name.to_string(),
                email: email.to_string(),
                role,
            })
            .await;
        match crate::auth::create_token(id, role, &config.jwt_secret) {
            Ok(token) => tracing::info!(%id, role = role.as_str(), "seeded dev user, token: {token}"),
            Err(err) => tracing::warn!("dev token issuance failed: {err}"),
        }
    }
}
