//! Outbound email delivery.
//!
//! `Mailer` is the seam between auth flows and the delivery provider so tests
//! can capture messages without network access.

use resend_rs::Resend;
use resend_rs::types::CreateEmailBaseOptions;

use crate::config::EmailConfig;

#[derive(Debug, thiserror::Error)]
#[error("email delivery failed: {0}")]
pub struct MailError(pub String);

/// Provider-neutral async trait for sending one HTML email.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Send a single message.
    ///
    /// # Errors
    ///
    /// Returns a [`MailError`] if the provider rejects the message or the
    /// request fails.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;
}

/// Resend-backed mailer.
pub struct ResendMailer {
    client: Resend,
    from: String,
}

impl ResendMailer {
    #[must_use]
    pub fn new(config: EmailConfig) -> Self {
        Self { client: Resend::new(&config.api_key), from: config.from }
    }
}

#[async_trait::async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let email = CreateEmailBaseOptions::new(&self.from, [to], subject).with_html(html);
        self.client
            .emails
            .send(email)
            .await
            .map_err(|e| MailError(e.to_string()))?;
        Ok(())
    }
}
