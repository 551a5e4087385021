//! Email fallback for offline recipients: the per-message decision
//! ([`pipeline`]), digest rendering ([`digest`]), the SMTP seam
//! ([`mailer`]) and the periodic flush ([`worker`]).

pub mod digest;
pub mod mailer;
pub mod pipeline;
pub mod worker;

pub use mailer::{LogMailer, Mailer, MailerError, SmtpMailer};
pub use pipeline::{FallbackOutcome, NotificationPipeline};
pub use worker::{FlushReport, NotificationFlushWorker};
