//! Salonchat - conversation backend for salons and their clients.
//!
//! A two-party messaging service: every conversation pairs one salon with
//! one client, history is persisted and ordered, delivery is realtime over
//! websockets across any number of server processes, and recipients who
//! are offline everywhere fall back to rate-limited digest emails.
//!
//! # Module Structure
//!
//! - **`store`** - persistence: the [`store::ChatStore`] trait with
//!   Postgres and in-memory implementations
//! - **`messaging`** - the domain service, REST handlers and guards
//! - **`realtime`** - websocket gateway, connection registry, event bus
//! - **`notifications`** - offline email fallback: pipeline, digests,
//!   mailer, flush worker
//! - **`presence`** / **`ratelimit`** - shared-store presence tracking and
//!   the notification rate gate
//! - **`jobs`** - retention sweeps
//! - **`server`** - state and application assembly
//!
//! # Usage
//!
//! ```rust,no_run
//! use salonchat::config::AppConfig;
//! use salonchat::server::create_app;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = create_app(AppConfig::from_env()).await?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod messaging;
pub mod notifications;
pub mod presence;
pub mod ratelimit;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod store;
