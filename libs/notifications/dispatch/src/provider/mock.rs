//! In-memory providers for tests and local runs

use super::{DeliveryError, EmailMessage, EmailProvider, SendResult, SmsProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Captures sent emails; optionally fails every send
#[derive(Clone, Default)]
pub struct MockEmailProvider {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    failure: Option<DeliveryError>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(error),
        }
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent.lock().await.iter().any(|e| e.to == address)
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &EmailMessage) -> Result<SendResult, DeliveryError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        Ok(SendResult {
            message_id: format!("mock-email-{}", sent.len()),
        })
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Captures `(to, body)` pairs
#[derive(Clone, Default)]
pub struct MockSmsProvider {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failure: Option<DeliveryError>,
}

impl MockSmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(error),
        }
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send(&self, to: &str, body: &str) -> Result<SendResult, DeliveryError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut sent = self.sent.lock().await;
        sent.push((to.to_string(), body.to_string()));
        Ok(SendResult {
            message_id: format!("mock-sms-{}", sent.len()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_email_captures() {
        let provider = MockEmailProvider::new();
        provider
            .send(&EmailMessage {
                to: "ana@hospital.example".into(),
                subject: "s".into(),
                body_text: "b".into(),
            })
            .await
            .unwrap();
        assert!(provider.was_sent_to("ana@hospital.example").await);
        assert!(!provider.was_sent_to("other@hospital.example").await);
    }

    #[tokio::test]
    async fn test_mock_sms_failure() {
        let provider = MockSmsProvider::failing(DeliveryError::Rejected("invalid number".into()));
        assert!(provider.send("+1", "x").await.is_err());
        assert!(provider.sent().await.is_empty());
    }
}
