use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::ServiceError;
use crate::config::MailConfig;

/// Outbound mail collaborator. Callers hand over the recipient and the raw
/// reset token; the provider owns the message wording.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
    site_domain: String,
    site_title: String,
}

impl EmailService {
    pub fn new(config: &MailConfig) -> Result<Self, ServiceError> {
        let mut builder = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| ServiceError::EmailError(e.to_string()))?
            .timeout(Some(Duration::from_secs(10)));

        if !config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.expose_secret().clone(),
            ));
        }

        tracing::info!(smtp_host = %config.smtp_host, "Email service initialized");

        Ok(Self {
            mailer: builder.build(),
            from_email: config.from.clone(),
            site_domain: config.site_domain.clone(),
            site_title: config.site_title.clone(),
        })
    }

    fn reset_link(&self, reset_token: &str) -> String {
        format!(
            "https://{}/reset-password?token={}",
            self.site_domain, reset_token
        )
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        body: String,
    ) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ServiceError::EmailError(e.to_string()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
                Err(ServiceError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), ServiceError> {
        let subject = format!("Your password reset link from {}", self.site_title);
        let body = format!("Your password reset link: {}", self.reset_link(reset_token));
        self.send_email(to_email, &subject, body).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub reset_token: String,
}

/// Records every message instead of delivering it.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), ServiceError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock mailbox poisoned: {}", e)))?;
        sent.push(SentEmail {
            to: to_email.to_string(),
            reset_token: reset_token.to_string(),
        });
        Ok(())
    }
}
