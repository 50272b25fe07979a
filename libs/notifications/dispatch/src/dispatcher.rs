//! Fan-out of a new occurrence to every channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_config::pipeline::DispatchSettings;
use domain_occurrences::{
    BoxError, Occurrence, OccurrenceNotifier, OccurrenceRepository, OccurrenceResult,
    OccurrenceService, OccurrenceStatus, StatusListener,
};
use metrics::counter;
use stream_worker::{StreamError, StreamProducer};
use tracing::{debug, error, info, instrument, warn};

use crate::content::OccurrenceAlert;
use crate::error::{DispatchError, DispatchResult};
use crate::job::DeliveryJob;
use crate::live::{LiveEvent, LiveEventKind, LivePublisher};
use crate::models::{
    DispatchReport, NewNotification, NotificationChannel, NotificationMetadata, NotificationStatus,
};
use crate::repository::{NotificationRepository, RecipientDirectory};

/// Where queued deliveries go
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Returns the stream entry id
    async fn enqueue(&self, job: &DeliveryJob) -> Result<String, StreamError>;
}

#[async_trait]
impl DeliveryQueue for StreamProducer {
    async fn enqueue(&self, job: &DeliveryJob) -> Result<String, StreamError> {
        self.send(job).await
    }
}

/// The slice of the occurrence service the dispatcher needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotifiedMarker: Send + Sync {
    async fn mark_notified(
        &self,
        occurrence: &Occurrence,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> OccurrenceResult<bool>;
}

#[async_trait]
impl<R: OccurrenceRepository + 'static> NotifiedMarker for OccurrenceService<R> {
    async fn mark_notified(
        &self,
        occurrence: &Occurrence,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> OccurrenceResult<bool> {
        OccurrenceService::mark_notified(self, occurrence, at, notes).await
    }
}

pub struct Dispatcher {
    live: Arc<dyn LivePublisher>,
    recipients: Arc<dyn RecipientDirectory>,
    queue: Arc<dyn DeliveryQueue>,
    occurrences: Arc<dyn NotifiedMarker>,
    notifications: Arc<dyn NotificationRepository>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        live: Arc<dyn LivePublisher>,
        recipients: Arc<dyn RecipientDirectory>,
        queue: Arc<dyn DeliveryQueue>,
        occurrences: Arc<dyn NotifiedMarker>,
        notifications: Arc<dyn NotificationRepository>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            live,
            recipients,
            queue,
            occurrences,
            notifications,
            settings,
        }
    }

    /// Push the occurrence live and queue one job per recipient channel.
    ///
    /// Individual channel failures are logged and counted in the report.
    /// Fails only when nothing at all went out, or when the occurrence
    /// could not be stamped as notified.
    #[instrument(skip_all, fields(occurrence_id = %occurrence.id, tenant_id = %occurrence.tenant_id))]
    pub async fn dispatch(&self, occurrence: &Occurrence) -> DispatchResult<DispatchReport> {
        let now = Utc::now();
        let mut report = DispatchReport {
            occurrence_id: occurrence.id,
            ..Default::default()
        };

        report.live_published = self.push_live(occurrence, now).await;

        let recipients = match self
            .recipients
            .operators_for(occurrence.tenant_id, occurrence.hospital_id)
            .await
        {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(error = %e, "Recipient lookup failed, only the live push went out");
                Vec::new()
            }
        };
        report.recipients = recipients.len();

        let alert = OccurrenceAlert::from_occurrence(occurrence);
        for recipient in &recipients {
            for (channel, to) in recipient.deliveries() {
                let job = DeliveryJob::new(occurrence.tenant_id, recipient.user_id, channel, to, alert.clone());
                match self.queue.enqueue(&job).await {
                    Ok(entry_id) => {
                        debug!(job_id = %job.id, channel = %channel, entry_id = %entry_id, "Delivery queued");
                        match channel {
                            NotificationChannel::Email => report.emails_queued += 1,
                            NotificationChannel::Sms => report.sms_queued += 1,
                            NotificationChannel::Dashboard => {}
                        }
                    }
                    Err(e) => {
                        report.enqueue_failures += 1;
                        warn!(
                            user_id = %recipient.user_id,
                            channel = %channel,
                            error = %e,
                            "Failed to queue delivery"
                        );
                    }
                }
            }
        }

        if !report.handed_off() {
            counter!("dispatch_total", "outcome" => "nothing_handed_off").increment(1);
            error!(recipients = report.recipients, "No channel accepted the occurrence");
            return Err(DispatchError::NothingHandedOff(occurrence.id));
        }

        self.occurrences
            .mark_notified(occurrence, now, Some(report.summary()))
            .await?;

        counter!("dispatch_total", "outcome" => "handed_off").increment(1);
        info!(
            live = report.live_published,
            recipients = report.recipients,
            emails = report.emails_queued,
            sms = report.sms_queued,
            failures = report.enqueue_failures,
            "Occurrence dispatched"
        );
        Ok(report)
    }

    /// Publish the live event and log the attempt as a dashboard notification
    async fn push_live(&self, occurrence: &Occurrence, now: DateTime<Utc>) -> bool {
        let event = LiveEvent::from_occurrence(LiveEventKind::NewOccurrence, occurrence, now);
        let outcome = match tokio::time::timeout(self.settings.channel_timeout, self.live.publish(&event)).await {
            Ok(Ok(receivers)) => {
                debug!(receivers, "Live event published");
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "live publish did not complete within {:?}",
                self.settings.channel_timeout
            )),
        };

        let (status, error_message) = match &outcome {
            Ok(()) => (NotificationStatus::Sent, None),
            Err(e) => {
                warn!(error = %e, "Live push failed");
                (NotificationStatus::Failed, Some(e.clone()))
            }
        };
        counter!(
            "notifications_total",
            "channel" => NotificationChannel::Dashboard.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        let record = NewNotification {
            tenant_id: occurrence.tenant_id,
            occurrence_id: occurrence.id,
            user_id: None,
            channel: NotificationChannel::Dashboard,
            status,
            error_message,
            metadata: NotificationMetadata {
                hospital_name: Some(event.hospital_name),
                sector: event.sector,
                time_remaining: Some(event.time_remaining),
                ..Default::default()
            },
        };
        if let Err(e) = self.notifications.record(record).await {
            error!(error = %e, "Failed to record dashboard notification");
        }

        outcome.is_ok()
    }
}

#[async_trait]
impl OccurrenceNotifier for Dispatcher {
    async fn notify_created(&self, occurrence: &Occurrence) -> Result<(), BoxError> {
        self.dispatch(occurrence).await?;
        Ok(())
    }
}

/// Pushes status changes made through the API to live dashboards
pub struct LiveStatusListener {
    live: Arc<dyn LivePublisher>,
}

impl LiveStatusListener {
    pub fn new(live: Arc<dyn LivePublisher>) -> Self {
        Self { live }
    }
}

#[async_trait]
impl StatusListener for LiveStatusListener {
    async fn status_changed(&self, occurrence: &Occurrence, previous: OccurrenceStatus) {
        let event = LiveEvent::from_occurrence(LiveEventKind::OccurrenceUpdated, occurrence, Utc::now());
        match self.live.publish(&event).await {
            Ok(_) => debug!(
                occurrence_id = %occurrence.id,
                from = %previous,
                to = %occurrence.status,
                "Status change pushed live"
            ),
            Err(e) => warn!(occurrence_id = %occurrence.id, error = %e, "Failed to push status change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::hub::MockLivePublisher;
    use crate::models::{Notification, NotificationPreferences, Recipient};
    use crate::repository::{MockNotificationRepository, MockRecipientDirectory};
    use chrono::{Duration, NaiveDate};
    use domain_occurrences::{OccurrenceError, OccurrencePayload};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn occurrence() -> Occurrence {
        let now = Utc::now();
        let death_time = now - Duration::hours(1);
        Occurrence {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            hospital_id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            status: OccurrenceStatus::Pending,
            priority_score: 100,
            masked_name: "Jo** Si***".into(),
            full_payload: OccurrencePayload {
                record_id: Uuid::new_v4(),
                patient_name: "Joao Silva".into(),
                birth_date: NaiveDate::from_ymd_opt(1960, 5, 1).unwrap(),
                age_at_death: 66,
                cause_of_death: "Stroke".into(),
                medical_record: None,
                sector: Some("UTI".into()),
                bed: None,
                identity_unknown: false,
                hospital_name: "Hospital Central".into(),
            },
            death_time,
            window_expires_at: death_time + Duration::hours(6),
            notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn recipient(email: bool, sms: bool) -> Recipient {
        Recipient {
            user_id: Uuid::new_v4(),
            name: "Ana".into(),
            email: "ana@hospital.example".into(),
            mobile_phone: Some("+5511999998888".into()),
            preferences: NotificationPreferences {
                email_enabled: email,
                sms_enabled: sms,
                dashboard_enabled: true,
            },
        }
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

    fn settings() -> DispatchSettings {
        DispatchSettings {
            channel_timeout: std::time::Duration::from_secs(2),
            dashboard_base_url: "https://vigil.example".into(),
        }
    }

    struct Harness {
        live: MockLivePublisher,
        recipients: MockRecipientDirectory,
        queue: MockDeliveryQueue,
        marker: MockNotifiedMarker,
        notifications: MockNotificationRepository,
    }

    impl Harness {
        fn new() -> Self {
            let mut notifications = MockNotificationRepository::new();
            notifications.expect_record().returning(|n| Ok(stored(n)));
            Self {
                live: MockLivePublisher::new(),
                recipients: MockRecipientDirectory::new(),
                queue: MockDeliveryQueue::new(),
                marker: MockNotifiedMarker::new(),
                notifications,
            }
        }

        fn build(self) -> Dispatcher {
            Dispatcher::new(
                Arc::new(self.live),
                Arc::new(self.recipients),
                Arc::new(self.queue),
                Arc::new(self.marker),
                Arc::new(self.notifications),
                settings(),
            )
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_every_enabled_channel() {
        let occ = occurrence();
        let queued: Arc<Mutex<Vec<DeliveryJob>>> = Arc::default();

        let mut h = Harness::new();
        h.live
            .expect_publish()
            .withf(|e| e.kind == LiveEventKind::NewOccurrence && e.hospital_name == "Hospital Central")
            .times(1)
            .returning(|_| Ok(2));
        h.recipients
            .expect_operators_for()
            .returning(|_, _| Ok(vec![recipient(true, true), recipient(true, false)]));
        let sink = queued.clone();
        h.queue.expect_enqueue().times(3).returning(move |job| {
            sink.lock().unwrap().push(job.clone());
            Ok("1-0".into())
        });
        h.marker
            .expect_mark_notified()
            .withf(|_, _, notes| notes.as_deref() == Some("live: sent, email: 2, sms: 1"))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let report = h.build().dispatch(&occ).await.unwrap();
        assert!(report.live_published);
        assert_eq!((report.recipients, report.emails_queued, report.sms_queued), (2, 2, 1));

        let jobs = queued.lock().unwrap();
        assert!(jobs.iter().all(|j| j.occurrence_id() == occ.id && j.tenant_id == occ.tenant_id));
        assert_eq!(jobs.iter().filter(|j| j.channel == NotificationChannel::Sms).count(), 1);
    }

    #[tokio::test]
    async fn test_live_failure_alone_still_notifies() {
        let mut h = Harness::new();
        h.live
            .expect_publish()
            .returning(|_| Err(DispatchError::NothingHandedOff(Uuid::nil())));
        h.recipients
            .expect_operators_for()
            .returning(|_, _| Ok(vec![recipient(true, false)]));
        h.queue.expect_enqueue().returning(|_| Ok("1-0".into()));
        h.marker.expect_mark_notified().times(1).returning(|_, _, _| Ok(true));

        let report = h.build().dispatch(&occurrence()).await.unwrap();
        assert!(!report.live_published);
        assert_eq!(report.emails_queued, 1);
    }

    #[tokio::test]
    async fn test_no_recipients_with_live_push_is_enough() {
        let mut h = Harness::new();
        h.live.expect_publish().returning(|_| Ok(0));
        h.recipients.expect_operators_for().returning(|_, _| Ok(vec![]));
        h.queue.expect_enqueue().never();
        h.marker.expect_mark_notified().times(1).returning(|_, _, _| Ok(true));

        let report = h.build().dispatch(&occurrence()).await.unwrap();
        assert!(report.handed_off());
        assert_eq!(report.recipients, 0);
    }

    #[tokio::test]
    async fn test_nothing_handed_off_is_an_error() {
        let mut h = Harness::new();
        h.live
            .expect_publish()
            .returning(|_| Err(DispatchError::Stream(StreamError::transient("redis down"))));
        h.recipients
            .expect_operators_for()
            .returning(|_, _| Ok(vec![recipient(true, true)]));
        h.queue
            .expect_enqueue()
            .returning(|_| Err(StreamError::transient("redis down")));
        h.marker.expect_mark_notified().never();

        let occ = occurrence();
        let err = h.build().dispatch(&occ).await.unwrap_err();
        assert!(matches!(err, DispatchError::NothingHandedOff(id) if id == occ.id));
    }

    #[tokio::test]
    async fn test_live_push_is_recorded_as_dashboard_row() {
        let mut h = Harness::new();
        let mut notifications = MockNotificationRepository::new();
        notifications
            .expect_record()
            .withf(|n| {
                n.channel == NotificationChannel::Dashboard
                    && n.status == NotificationStatus::Sent
                    && n.user_id.is_none()
                    && n.metadata.sector.as_deref() == Some("UTI")
            })
            .times(1)
            .returning(|n| Ok(stored(n)));
        h.notifications = notifications;
        h.live.expect_publish().returning(|_| Ok(1));
        h.recipients.expect_operators_for().returning(|_, _| Ok(vec![]));
        h.marker.expect_mark_notified().returning(|_, _, _| Ok(true));

        h.build().dispatch(&occurrence()).await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_notified_failure_propagates() {
        let mut h = Harness::new();
        h.live.expect_publish().returning(|_| Ok(1));
        h.recipients.expect_operators_for().returning(|_, _| Ok(vec![]));
        h.marker
            .expect_mark_notified()
            .returning(|_, _, _| Err(OccurrenceError::Database(sea_orm::DbErr::Custom("down".into()))));

        let err = h.build().notify_created(&occurrence()).await.unwrap_err();
        assert!(err.to_string().contains("down"), "{err}");
    }

    #[tokio::test]
    async fn test_status_listener_publishes_update() {
        let mut live = MockLivePublisher::new();
        live.expect_publish()
            .withf(|e| e.kind == LiveEventKind::OccurrenceUpdated && e.status == OccurrenceStatus::Accepted)
            .times(1)
            .returning(|_| Ok(1));

        let mut occ = occurrence();
        occ.status = OccurrenceStatus::Accepted;
        LiveStatusListener::new(Arc::new(live))
            .status_changed(&occ, OccurrenceStatus::InProgress)
            .await;
    }
}
