//! Out-of-band delivery of temporary credentials.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

/// Login details for a newly approved operator.
pub struct CredentialDelivery {
    pub to: String,
    pub full_name: String,
    pub vehicle_id: String,
    pub temporary_secret: SecretString,
}

impl std::fmt::Debug for CredentialDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDelivery")
            .field("to", &self.to)
            .field("full_name", &self.full_name)
            .field("vehicle_id", &self.vehicle_id)
            .field("temporary_secret", &"[REDACTED]")
            .finish()
    }
}

impl CredentialDelivery {
    fn subject(&self) -> String {
        format!("ResqFlow access approved for vehicle {}", self.vehicle_id)
    }

    fn plain_body(&self) -> String {
        format!(
            "Hello {},\n\nYour registration for vehicle {} has been approved.\n\n\
             Login email: {}\nTemporary password: {}\n\n\
             Sign in to the operator console and change this password.",
            self.full_name,
            self.vehicle_id,
            self.to,
            self.temporary_secret.expose_secret()
        )
    }

    fn html_body(&self) -> String {
        format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Access approved</h2>
        <p>Hello {}, your registration for vehicle <strong>{}</strong> has been approved.</p>
        <p>Login email: {}<br/>Temporary password: <code>{}</code></p>
        <p style="color: #666; font-size: 12px;">Sign in to the operator console and change this password.</p>
    </body>
</html>
"###,
            self.full_name,
            self.vehicle_id,
            self.to,
            self.temporary_secret.expose_secret()
        )
    }
}

#[async_trait]
pub trait CredentialMailer: Send + Sync {
    async fn deliver(&self, delivery: &CredentialDelivery) -> Result<(), DeliveryError>;
    fn is_enabled(&self) -> bool;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, DeliveryError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                DeliveryError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        tracing::info!(host = %config.host, "SMTP credential mailer initialized");

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl CredentialMailer for SmtpMailer {
    async fn deliver(&self, delivery: &CredentialDelivery) -> Result<(), DeliveryError> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            DeliveryError::NotEnabled("SMTP credential mailer is not enabled".to_string())
        })?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| DeliveryError::Configuration(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = delivery
            .to
            .parse()
            .map_err(|e| DeliveryError::InvalidRecipient(format!("{}: {}", delivery.to, e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(delivery.subject())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(delivery.plain_body()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(delivery.html_body()),
                    ),
            )
            .map_err(|e| DeliveryError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %delivery.to, "Credential email sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// A delivery captured by [`MockMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCredential {
    pub to: String,
    pub vehicle_id: String,
    pub temporary_secret: String,
}

/// Mock mailer for testing
#[derive(Default)]
pub struct MockMailer {
    failing: AtomicBool,
    sent: Mutex<Vec<SentCredential>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentCredential> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CredentialMailer for MockMailer {
    async fn deliver(&self, delivery: &CredentialDelivery) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::SendFailed(
                "Mock mailer configured to fail".to_string(),
            ));
        }

        tracing::info!(to = %delivery.to, "[MOCK] Credential email would be sent");

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentCredential {
                to: delivery.to.clone(),
                vehicle_id: delivery.vehicle_id.clone(),
                temporary_secret: delivery.temporary_secret.expose_secret().clone(),
            });
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> CredentialDelivery {
        CredentialDelivery {
            to: "op@fleet".to_string(),
            full_name: "Asha".to_string(),
            vehicle_id: "AMB-1".to_string(),
            temporary_secret: SecretString::new("abc123XYZ!".to_string()),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", delivery());
        assert!(!rendered.contains("abc123XYZ!"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_bodies_carry_login_details() {
        let delivery = delivery();
        assert!(delivery.plain_body().contains("abc123XYZ!"));
        assert!(delivery.html_body().contains("AMB-1"));
        assert!(delivery.subject().contains("AMB-1"));
    }

    #[tokio::test]
    async fn test_disabled_smtp_mailer_reports_not_enabled() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from_email: "noreply@resqflow.test".to_string(),
            from_name: "ResqFlow".to_string(),
            enabled: false,
        })
        .unwrap();

        assert!(!mailer.is_enabled());
        assert!(matches!(
            mailer.deliver(&delivery()).await,
            Err(DeliveryError::NotEnabled(_))
        ));
    }
}
