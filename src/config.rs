//! Server configuration.
//!
//! Loaded from environment variables with development defaults, the same
//! way the rest of the deployment is configured. Missing optional services
//! (Postgres, Redis, SMTP) are logged and the server degrades rather than
//! refusing to start.

use std::time::Duration;

/// SMTP settings for the digest mailer.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub smtp: Option<SmtpConfig>,
    /// Soft-delete messages older than this many days.
    pub retention_days: u32,
    /// Hard-delete archived messages older than this many days; 0 disables.
    pub hard_delete_days: u32,
    /// Minimum interval between two digest emails per (conversation, recipient).
    pub rate_limit_window: Duration,
    /// How often the flush worker scans PENDING digest entries.
    pub notification_flush_interval: Duration,
    /// Presence set expiry in the shared store.
    pub presence_ttl: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid {key}, using default");
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using development secret");
            "dev-secret-change-in-production".to_string()
        });

        let smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_USERNAME"),
            std::env::var("SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(SmtpConfig {
                host,
                username,
                password,
                from: std::env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "notifications@salonchat.local".to_string()),
            }),
            _ => {
                tracing::warn!("SMTP not configured, digest emails will be logged and dropped");
                None
            }
        };

        Self {
            server_port: env_parse("SERVER_PORT", 3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            jwt_secret,
            smtp,
            retention_days: env_parse("RETENTION_DAYS", 90),
            hard_delete_days: env_parse("HARD_DELETE_DAYS", 0),
            rate_limit_window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 300)),
            notification_flush_interval: Duration::from_secs(env_parse(
                "NOTIFICATION_FLUSH_INTERVAL_SECS",
                120,
            )),
            presence_ttl: Duration::from_secs(env_parse("PRESENCE_TTL_SECS", 3600)),
        }
    }
}

impl Default for AppConfig {
    /// Development defaults: in-memory store, no redis, no SMTP.
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: None,
            redis_url: None,
            jwt_secret: "dev-secret-change-in-production".to_string(),
            smtp: None,
            retention_days: 90,
            hard_delete_days: 0,
            rate_limit_window: Duration::from_secs(300),
            notification_flush_interval: Duration::from_secs(120),
            presence_ttl: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.hard_delete_days, 0);
        assert_eq!(config.rate_limit_window, Duration::from_secs(300));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("SALONCHAT_TEST_PORT", "not-a-number");
        assert_eq!(env_parse("SALONCHAT_TEST_PORT", 42u16), 42);
        std::env::remove_var("SALONCHAT_TEST_PORT");
    }
}
