//! Outbound email transport.
//!
//! The flush worker talks to a [`Mailer`] trait so tests can record sends
//! and a deployment without SMTP credentials still runs (digests are logged
//! and dropped).

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("invalid email address: {0}")]
    Address(String),
    #[error("email build failed: {0}")]
    Build(String),
    #[error("email send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one HTML email. Returns a transport-level id for the log line.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, MailerError>;
}

/// Production mailer over SMTP with TLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailerError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| MailerError::Build(e.to_string()))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let from = config
            .from
            .parse()
            .map_err(|_| MailerError::Address(config.from.clone()))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, MailerError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| MailerError::Address(to.to_string()))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| MailerError::Build(e.to_string()))?;
        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| MailerError::Send(e.to_string()))?;
        Ok(response.code().to_string())
    }
}

/// Stand-in when SMTP is not configured; logs the digest and succeeds.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<String, MailerError> {
        tracing::info!(%to, %subject, "SMTP not configured, dropping digest email");
        Ok("logged".to_string())
    }
}
