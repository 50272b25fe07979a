//! SMTP email provider using lettre

use super::{DeliveryError, EmailMessage, EmailProvider, SendResult};
use async_trait::async_trait;
use core_config::{ConfigError, env_optional, env_or_default, env_parse_or_default};
use eyre::{Result, WrapErr};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::sync::Arc;
use uuid::Uuid;

/// SMTP provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub use_tls: bool,
}

impl SmtpConfig {
    /// `None` when `SMTP_HOST` is unset, which disables the email channel.
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        let Some(host) = env_optional("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            host,
            port: env_parse_or_default("SMTP_PORT", 587)?,
            username: env_or_default("SMTP_USERNAME", ""),
            password: env_or_default("SMTP_PASSWORD", ""),
            from_email: env_or_default("EMAIL_FROM_ADDRESS", "noreply@localhost"),
            from_name: env_or_default("EMAIL_FROM_NAME", "Vigil"),
            use_tls: env_parse_or_default("SMTP_USE_TLS", true)?,
        }))
    }
}

/// SMTP email provider
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .wrap_err("Failed to create SMTP relay")?
                .credentials(creds)
                .port(config.port)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .build()
        } else {
            // No auth (Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        // Fail at startup rather than on the first delivery
        format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .wrap_err("Invalid EMAIL_FROM_ADDRESS")?;

        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    fn build_message(&self, email: &EmailMessage) -> Result<Message, DeliveryError> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| DeliveryError::Rejected(format!("invalid from address: {e}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::Rejected(format!("invalid recipient address: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| DeliveryError::Rejected(format!("failed to build message: {e}")))
    }
}

fn classify(err: lettre::transport::smtp::Error) -> DeliveryError {
    if err.is_permanent() {
        DeliveryError::Rejected(err.to_string())
    } else {
        DeliveryError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailMessage) -> Result<SendResult, DeliveryError> {
        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(classify)?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::debug!(subject = %email.subject, message_id = %message_id, "Email accepted by SMTP server");

        Ok(SendResult { message_id })
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DeliveryError::Unavailable("SMTP server not reachable".into())),
            Err(e) => Err(classify(e)),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            from_email: "alerts@vigil.example".into(),
            from_name: "Vigil".into(),
            use_tls: false,
        }
    }

    #[test]
    fn test_smtp_disabled_without_host() {
        temp_env::with_var_unset("SMTP_HOST", || {
            assert!(SmtpConfig::from_env_optional().unwrap().is_none());
        });
    }

    #[test]
    fn test_smtp_from_env() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("mail.example")),
                ("SMTP_PORT", Some("2525")),
                ("SMTP_USE_TLS", Some("false")),
                ("EMAIL_FROM_ADDRESS", Some("alerts@vigil.example")),
            ],
            || {
                let config = SmtpConfig::from_env_optional().unwrap().unwrap();
                assert_eq!(config.host, "mail.example");
                assert_eq!(config.port, 2525);
                assert!(!config.use_tls);
                assert_eq!(config.from_email, "alerts@vigil.example");
            },
        );
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected() {
        let provider = SmtpProvider::new(local_config()).unwrap();
        let err = provider
            .build_message(&EmailMessage {
                to: "not an address".into(),
                subject: "s".into(),
                body_text: "b".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(_)));
    }

    #[test]
    fn test_invalid_sender_fails_at_startup() {
        let mut config = local_config();
        config.from_email = "nope".into();
        assert!(SmtpProvider::new(config).is_err());
    }
}
