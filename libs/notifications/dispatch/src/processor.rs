//! Delivery consumer: sends queued email and SMS jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use core_config::pipeline::DispatchSettings;
use metrics::counter;
use stream_worker::{StreamError, StreamProcessor};
use tracing::{debug, error, info, instrument, warn};

use crate::content::{OccurrenceAlert, email_subject, render_email, render_sms};
use crate::job::DeliveryJob;
use crate::models::{
    NewNotification, NotificationChannel, NotificationMetadata, NotificationStatus, mask_phone,
};
use crate::provider::{DeliveryError, EmailProvider, SendResult, SmsProvider};
use crate::repository::NotificationRepository;

pub struct DeliveryProcessor {
    notifications: Arc<dyn NotificationRepository>,
    email: Option<Arc<dyn EmailProvider>>,
    sms: Option<Arc<dyn SmsProvider>>,
    settings: DispatchSettings,
}

impl DeliveryProcessor {
    pub fn new(notifications: Arc<dyn NotificationRepository>, settings: DispatchSettings) -> Self {
        Self {
            notifications,
            email: None,
            sms: None,
            settings,
        }
    }

    pub fn with_email(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.email = Some(provider);
        self
    }

    pub fn with_sms(mut self, provider: Arc<dyn SmsProvider>) -> Self {
        self.sms = Some(provider);
        self
    }

    #[instrument(skip_all, fields(job_id = %job.id, occurrence_id = %job.occurrence_id(), user_id = %job.user_id))]
    async fn deliver_email(&self, job: &DeliveryJob) -> Result<(), StreamError> {
        let provider = self
            .email
            .as_ref()
            .ok_or_else(|| StreamError::permanent("email channel is not configured"))?;

        let message = render_email(&job.alert, &job.to, &self.settings.dashboard_base_url, Utc::now());
        let sent = self.bounded(provider.send(&message)).await?;
        info!(provider = provider.name(), message_id = %sent.message_id, "Email sent");

        let metadata = NotificationMetadata {
            email_to: Some(job.to.clone()),
            email_subject: Some(message.subject),
            ..alert_metadata(&job.alert)
        };
        self.record(job, NotificationStatus::Sent, None, metadata).await;
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %job.id, occurrence_id = %job.occurrence_id(), user_id = %job.user_id))]
    async fn deliver_sms(&self, job: &DeliveryJob) -> Result<(), StreamError> {
        let provider = self
            .sms
            .as_ref()
            .ok_or_else(|| StreamError::permanent("sms channel is not configured"))?;

        // A redelivered job must not text the same person twice
        let already_sent = self
            .notifications
            .exists_sms_for(job.occurrence_id(), job.user_id)
            .await
            .map_err(|e| StreamError::transient(e.to_string()))?;
        if already_sent {
            debug!("SMS already sent for this occurrence and user, skipping");
            return Ok(());
        }

        let body = render_sms(&job.alert, &self.settings.dashboard_base_url, Utc::now());
        let sent = self.bounded(provider.send(&job.to, &body)).await?;
        info!(
            provider = provider.name(),
            message_id = %sent.message_id,
            to = %mask_phone(&job.to),
            "SMS sent"
        );

        let metadata = NotificationMetadata {
            sms_to: Some(mask_phone(&job.to)),
            sms_message: Some(body),
            ..alert_metadata(&job.alert)
        };
        self.record(job, NotificationStatus::Sent, None, metadata).await;
        Ok(())
    }

    /// Run a provider call under the channel timeout
    async fn bounded<F>(&self, send: F) -> Result<SendResult, StreamError>
    where
        F: Future<Output = Result<SendResult, DeliveryError>>,
    {
        match tokio::time::timeout(self.settings.channel_timeout, send).await {
            Ok(result) => result.map_err(StreamError::from),
            Err(_) => Err(StreamError::transient(format!(
                "provider did not answer within {:?}",
                self.settings.channel_timeout
            ))),
        }
    }

    /// Store the attempt. The message is already out, so a storage failure
    /// is logged and the job still counts as delivered.
    async fn record(
        &self,
        job: &DeliveryJob,
        status: NotificationStatus,
        error_message: Option<String>,
        metadata: NotificationMetadata,
    ) {
        counter!(
            "notifications_total",
            "channel" => job.channel.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        let input = NewNotification {
            tenant_id: job.tenant_id,
            occurrence_id: job.occurrence_id(),
            user_id: Some(job.user_id),
            channel: job.channel,
            status,
            error_message,
            metadata,
        };
        if let Err(e) = self.notifications.record(input).await {
            error!(
                job_id = %job.id,
                occurrence_id = %job.occurrence_id(),
                channel = %job.channel,
                error = %e,
                "Failed to record notification"
            );
        }
    }
}

fn alert_metadata(alert: &OccurrenceAlert) -> NotificationMetadata {
    NotificationMetadata {
        hospital_name: Some(alert.hospital_name.clone()),
        sector: alert.sector.clone(),
        time_remaining: Some(alert.time_remaining(Utc::now())),
        ..Default::default()
    }
}

#[async_trait]
impl StreamProcessor<DeliveryJob> for DeliveryProcessor {
    async fn process(&self, job: &DeliveryJob) -> Result<(), StreamError> {
        match job.channel {
            NotificationChannel::Email => self.deliver_email(job).await,
            NotificationChannel::Sms => self.deliver_sms(job).await,
            NotificationChannel::Dashboard => Err(StreamError::permanent(
                "dashboard pushes are not delivered through the queue",
            )),
        }
    }

    fn name(&self) -> &'static str {
        "delivery-processor"
    }

    async fn on_dead_letter(&self, job: &DeliveryJob, error: &StreamError) {
        warn!(
            job_id = %job.id,
            occurrence_id = %job.occurrence_id(),
            channel = %job.channel,
            retry_count = job.retry_count,
            error = %error,
            "Delivery dead-lettered"
        );

        let metadata = match job.channel {
            NotificationChannel::Sms => NotificationMetadata {
                sms_to: Some(mask_phone(&job.to)),
                ..alert_metadata(&job.alert)
            },
            NotificationChannel::Email => NotificationMetadata {
                email_to: Some(job.to.clone()),
                email_subject: Some(email_subject(&job.alert.hospital_name)),
                ..alert_metadata(&job.alert)
            },
            NotificationChannel::Dashboard => alert_metadata(&job.alert),
        };
        self.record(job, NotificationStatus::Failed, Some(error.to_string()), metadata)
            .await;
    }

    async fn health_check(&self) -> Result<bool, StreamError> {
        let Some(provider) = &self.email else {
            return Ok(true);
        };
        match provider.health_check().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Email provider unhealthy");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::models::Notification;
    use crate::provider::{MockEmailProvider, MockSmsProvider};
    use crate::repository::MockNotificationRepository;
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use stream_worker::ErrorCategory;
    use uuid::Uuid;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            channel_timeout: StdDuration::from_secs(2),
            dashboard_base_url: "https://vigil.example".into(),
        }
    }

    fn job(channel: NotificationChannel, to: &str) -> DeliveryJob {
        DeliveryJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            channel,
            to,
            OccurrenceAlert {
                occurrence_id: Uuid::new_v4(),
                hospital_name: "Hospital Central".into(),
                sector: Some("UTI".into()),
                age_at_death: 58,
                priority_score: 90,
                window_expires_at: Utc::now() + Duration::hours(5),
            },
        )
    }

    fn stored(input: NewNotification) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            occurrence_id: input.occurrence_id,
            user_id: input.user_id,
            channel: input.channel,
            sent_at: Utc::now(),
            status: input.status,
            error_message: input.error_message,
            metadata: input.metadata,
        }
    }

    struct SlowEmail;

    #[async_trait]
    impl EmailProvider for SlowEmail {
        async fn send(&self, _email: &crate::provider::EmailMessage) -> Result<SendResult, DeliveryError> {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
            Ok(SendResult {
                message_id: "late".into(),
            })
        }

        async fn health_check(&self) -> Result<(), DeliveryError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_email_is_sent_and_recorded() {
        let email = MockEmailProvider::new();
        let mut repo = MockNotificationRepository::new();
        repo.expect_record()
            .withf(|n| {
                n.channel == NotificationChannel::Email
                    && n.status == NotificationStatus::Sent
                    && n.metadata.email_to.as_deref() == Some("ana@hospital.example")
                    && n.metadata.hospital_name.as_deref() == Some("Hospital Central")
            })
            .times(1)
            .returning(|n| Ok(stored(n)));

        let processor = DeliveryProcessor::new(Arc::new(repo), settings())
            .with_email(Arc::new(email.clone()));
        processor
            .process(&job(NotificationChannel::Email, "ana@hospital.example"))
            .await
            .unwrap();

        let sent = email.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("[URGENT]"));
    }

    #[tokio::test]
    async fn test_sms_guard_skips_second_send() {
        let sms = MockSmsProvider::new();
        let mut repo = MockNotificationRepository::new();
        repo.expect_exists_sms_for().returning(|_, _| Ok(true));
        repo.expect_record().never();

        let processor = DeliveryProcessor::new(Arc::new(repo), settings()).with_sms(Arc::new(sms.clone()));
        processor
            .process(&job(NotificationChannel::Sms, "+5511999998888"))
            .await
            .unwrap();
        assert!(sms.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_sms_metadata_masks_number() {
        let sms = MockSmsProvider::new();
        let mut repo = MockNotificationRepository::new();
        repo.expect_exists_sms_for().returning(|_, _| Ok(false));
        repo.expect_record()
            .withf(|n| n.metadata.sms_to.as_deref() == Some("+55119****8888"))
            .times(1)
            .returning(|n| Ok(stored(n)));

        let processor = DeliveryProcessor::new(Arc::new(repo), settings()).with_sms(Arc::new(sms.clone()));
        processor
            .process(&job(NotificationChannel::Sms, "+5511999998888"))
            .await
            .unwrap();

        let sent = sms.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+5511999998888");
        assert!(sent[0].1.chars().count() <= crate::content::SMS_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_provider_errors_keep_their_category() {
        let cases = [
            (DeliveryError::Rejected("bad address".into()), ErrorCategory::Permanent),
            (DeliveryError::Unavailable("503".into()), ErrorCategory::Transient),
            (DeliveryError::RateLimited("429".into()), ErrorCategory::RateLimited),
        ];
        for (failure, category) in cases {
            let processor = DeliveryProcessor::new(Arc::new(MockNotificationRepository::new()), settings())
                .with_email(Arc::new(MockEmailProvider::failing(failure)));
            let err = processor
                .process(&job(NotificationChannel::Email, "ana@hospital.example"))
                .await
                .unwrap_err();
            assert_eq!(err.category(), category);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_as_transient() {
        let processor = DeliveryProcessor::new(Arc::new(MockNotificationRepository::new()), settings())
            .with_email(Arc::new(SlowEmail));
        let err = processor
            .process(&job(NotificationChannel::Email, "ana@hospital.example"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_permanent() {
        let processor = DeliveryProcessor::new(Arc::new(MockNotificationRepository::new()), settings());
        let err = processor
            .process(&job(NotificationChannel::Sms, "+5511999998888"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);

        let err = processor
            .process(&job(NotificationChannel::Dashboard, "-"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_fail_the_job() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_record()
            .returning(|_| Err(DispatchError::Database(sea_orm::DbErr::Custom("down".into()))));

        let processor = DeliveryProcessor::new(Arc::new(repo), settings())
            .with_email(Arc::new(MockEmailProvider::new()));
        processor
            .process(&job(NotificationChannel::Email, "ana@hospital.example"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dead_letter_records_failure() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_record()
            .withf(|n| {
                n.status == NotificationStatus::Failed
                    && n.error_message.as_deref().is_some_and(|m| m.contains("invalid number"))
                    && n.metadata.sms_to.as_deref() == Some("+55119****8888")
            })
            .times(1)
            .returning(|n| Ok(stored(n)));

        let processor = DeliveryProcessor::new(Arc::new(repo), settings());
        processor
            .on_dead_letter(
                &job(NotificationChannel::Sms, "+5511999998888"),
                &StreamError::permanent("invalid number"),
            )
            .await;
    }

    #[tokio::test]
    async fn test_health_follows_email_provider() {
        let repo = || Arc::new(MockNotificationRepository::new());
        let healthy = DeliveryProcessor::new(repo(), settings()).with_email(Arc::new(MockEmailProvider::new()));
        assert!(healthy.health_check().await.unwrap());

        let down = DeliveryProcessor::new(repo(), settings())
            .with_email(Arc::new(MockEmailProvider::failing(DeliveryError::Unavailable("refused".into()))));
        assert!(!down.health_check().await.unwrap());
    }
}
