//! Dispatcher → delivery stream → processor against real Postgres and Redis

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use core_config::pipeline::DispatchSettings;
use domain_occurrences::{
    NewOccurrence, OccurrencePayload, OccurrenceService, PgOccurrenceRepository,
};
use notification_dispatch::provider::{MockEmailProvider, MockSmsProvider};
use notification_dispatch::*;
use redis::AsyncCommands;
use stream_worker::{StreamDef, StreamProcessor, StreamProducer};
use test_utils::{SeedRecord, TestDatabase, TestRedis};

async fn queued_jobs(redis: &TestRedis) -> Vec<DeliveryJob> {
    let mut conn = redis.connection();
    let reply: redis::streams::StreamRangeReply = conn
        .xrange_all(DeliveryStream::STREAM_NAME)
        .await
        .unwrap();
    reply
        .ids
        .iter()
        .map(|entry| {
            let job: String = entry.get("job").unwrap();
            serde_json::from_str(&job).unwrap()
        })
        .collect()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_new_occurrence_reaches_operators_once() {
    let db = TestDatabase::new().await;
    let redis = TestRedis::new().await;

    let tenant_id = db.seed_tenant("dispatch").await;
    let hospital_id = db.seed_hospital(tenant_id, "Hospital Central").await;
    let other_hospital = db.seed_hospital(tenant_id, "Hospital Norte").await;

    let both = db
        .seed_user(tenant_id, Some(hospital_id), "operator", "ana@central.example", Some("+5511999998888"))
        .await;
    db.seed_preferences(both, true, true).await;
    // No preferences row: email only
    db.seed_user(tenant_id, None, "operator", "bia@central.example", Some("+5511988887777"))
        .await;
    // Pinned elsewhere
    db.seed_user(tenant_id, Some(other_hospital), "operator", "caio@norte.example", None)
        .await;

    let death_time = Utc::now() - Duration::hours(1);
    let record_id = db
        .seed_eligible_record(SeedRecord {
            tenant_id,
            hospital_id,
            patient_name: "Rita Souza",
            birth_date: NaiveDate::from_ymd_opt(death_time.year() - 55, 3, 1).unwrap(),
            death_time,
            cause_of_death: "Stroke",
            sector: Some("UTI"),
            identity_unknown: false,
        })
        .await;

    let occurrences = OccurrenceService::new(PgOccurrenceRepository::new(db.connection()));
    let occurrence = occurrences
        .create(NewOccurrence {
            tenant_id,
            hospital_id,
            record_id,
            priority_score: 100,
            death_time,
            payload: OccurrencePayload {
                record_id,
                patient_name: "Rita Souza".into(),
                birth_date: NaiveDate::from_ymd_opt(death_time.year() - 55, 3, 1).unwrap(),
                age_at_death: 55,
                cause_of_death: "Stroke".into(),
                medical_record: None,
                sector: Some("UTI".into()),
                bed: None,
                identity_unknown: false,
                hospital_name: "Hospital Central".into(),
            },
        })
        .await
        .unwrap();

    let settings = DispatchSettings {
        channel_timeout: StdDuration::from_secs(5),
        dashboard_base_url: "https://vigil.example".into(),
    };
    let notifications = Arc::new(PgNotificationRepository::new(db.connection()));
    let dispatcher = Dispatcher::new(
        Arc::new(LiveHub::new(redis.connection())),
        Arc::new(PgRecipientDirectory::new(db.connection())),
        Arc::new(StreamProducer::from_stream_def::<DeliveryStream>(redis.connection())),
        Arc::new(occurrences.clone()),
        notifications.clone(),
        settings.clone(),
    );

    let report = dispatcher.dispatch(&occurrence).await.unwrap();
    assert!(report.live_published);
    assert_eq!((report.recipients, report.emails_queued, report.sms_queued), (2, 2, 1));

    let stamped = occurrences.find_by_record(record_id).await.unwrap().unwrap();
    assert!(stamped.notified_at.is_some());

    let email = MockEmailProvider::new();
    let sms = MockSmsProvider::new();
    let processor = DeliveryProcessor::new(notifications.clone(), settings)
        .with_email(Arc::new(email.clone()))
        .with_sms(Arc::new(sms.clone()));

    let jobs = queued_jobs(&redis).await;
    assert_eq!(jobs.len(), 3);
    for job in &jobs {
        processor.process(job).await.unwrap();
    }
    // A redelivered SMS job is not sent again
    let sms_job = jobs
        .iter()
        .find(|j| j.channel == NotificationChannel::Sms)
        .unwrap();
    processor.process(sms_job).await.unwrap();

    assert_eq!(email.sent_count().await, 2);
    assert!(email.was_sent_to("ana@central.example").await);
    assert!(!email.was_sent_to("caio@norte.example").await);
    assert_eq!(sms.sent().await.len(), 1);

    let rows = notifications.list_for_occurrence(occurrence.id).await.unwrap();
    let count = |channel| rows.iter().filter(|n| n.channel == channel).count();
    assert_eq!(count(NotificationChannel::Dashboard), 1);
    assert_eq!(count(NotificationChannel::Email), 2);
    assert_eq!(count(NotificationChannel::Sms), 1);
    assert!(rows.iter().all(|n| n.status == NotificationStatus::Sent));
    assert!(rows.iter().all(|n| n.tenant_id == tenant_id));
    assert!(
        rows.iter()
            .filter_map(|n| n.metadata.sms_to.as_deref())
            .all(|to| to == "+55119****8888")
    );
}
