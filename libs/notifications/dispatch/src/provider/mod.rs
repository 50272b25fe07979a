//! Outbound channel providers

pub mod mock;
pub mod smtp;
pub mod twilio;

pub use mock::{MockEmailProvider, MockSmsProvider};
pub use smtp::{SmtpConfig, SmtpProvider};
pub use twilio::TwilioSmsProvider;

use async_trait::async_trait;
use stream_worker::StreamError;
use thiserror::Error;

/// A plain-text email ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

/// Result of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// Provider-specific message ID
    pub message_id: String,
}

/// Why a provider refused or failed a send.
///
/// The variant decides whether the delivery stream retries the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Will fail the same way on every attempt (bad address, bad credentials)
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<DeliveryError> for StreamError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::RateLimited(msg) => StreamError::rate_limited(msg),
            DeliveryError::Rejected(msg) => StreamError::permanent(msg),
            DeliveryError::Unavailable(msg) => StreamError::transient(msg),
        }
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<SendResult, DeliveryError>;

    async fn health_check(&self) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SendResult, DeliveryError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_worker::ErrorCategory;

    #[test]
    fn test_delivery_error_categories() {
        let cases = [
            (DeliveryError::RateLimited("429".into()), ErrorCategory::RateLimited),
            (DeliveryError::Rejected("bad number".into()), ErrorCategory::Permanent),
            (DeliveryError::Unavailable("timeout".into()), ErrorCategory::Transient),
        ];
        for (err, category) in cases {
            assert_eq!(StreamError::from(err).category(), category);
        }
    }
}
