//! Poller → stream → triage against real Postgres and Redis

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use core_config::pipeline::PollerSettings;
use core_tenancy::TenantScope;
use domain_occurrences::{
    BoxError, Occurrence, OccurrenceNotifier, OccurrenceService, OccurrenceStatus,
    PgOccurrenceRepository,
};
use domain_triage::*;
use redis::AsyncCommands;
use serde_json::json;
use stream_worker::{StreamDef, StreamProducer, StreamProcessor};
use test_utils::{SeedRecord, TestDatabase, TestRedis};
use tokio::sync::watch;
use uuid::Uuid;

/// Stands in for the dispatcher: counts hand-offs and stamps `notified_at`
struct RecordingNotifier {
    service: OccurrenceService<PgOccurrenceRepository>,
    calls: AtomicUsize,
}

#[async_trait]
impl OccurrenceNotifier for RecordingNotifier {
    async fn notify_created(&self, occurrence: &Occurrence) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.service.mark_notified(occurrence, Utc::now(), None).await?;
        Ok(())
    }
}

async fn published_events(redis: &TestRedis) -> Vec<DetectionEvent> {
    let mut conn = redis.connection();
    let reply: redis::streams::StreamRangeReply = conn
        .xrange_all(DetectionStream::STREAM_NAME)
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

fn seed(tenant_id: Uuid, hospital_id: Uuid, age: i32, hours_ago: i64, cause: &'static str) -> SeedRecord<'static> {
    let death_time = Utc::now() - Duration::hours(hours_ago);
    SeedRecord {
        tenant_id,
        hospital_id,
        patient_name: "Paulo Mendes",
        birth_date: NaiveDate::from_ymd_opt(death_time.year() - age, 1, 1).unwrap(),
        death_time,
        cause_of_death: cause,
        sector: Some("UTI"),
        identity_unknown: false,
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_detected_records_flow_into_occurrences_once() {
    let db = TestDatabase::new().await;
    let redis = TestRedis::new().await;

    let tenant_id = db.seed_tenant("pipeline").await;
    let hospital_id = db.seed_hospital(tenant_id, "Hospital Central").await;
    db.seed_triage_rule(tenant_id, "max age", 3, json!({"tipo": "idade_maxima", "valor": 80}))
        .await;
    db.seed_triage_rule(
        tenant_id,
        "exclusions",
        2,
        json!({"tipo": "causas_excludentes", "valor": ["sepsis"]}),
    )
    .await;
    let eligible = db
        .seed_eligible_record(seed(tenant_id, hospital_id, 60, 2, "Myocardial infarction"))
        .await;
    db.seed_eligible_record(seed(tenant_id, hospital_id, 50, 1, "Sepsis"))
        .await;

    let records = Arc::new(PgEligibleRecordRepository::new(db.connection()));
    let hospitals = Arc::new(PgHospitalDirectory::new(db.connection()));
    let producer = StreamProducer::from_stream_def::<DetectionStream>(redis.connection());

    let poller = Poller::new(
        records.clone(),
        hospitals.clone(),
        Arc::new(producer),
        PollerSettings::default(),
    );
    let hospital = hospitals.find(hospital_id).await.unwrap().unwrap();
    let (_tx, rx) = watch::channel(false);

    assert_eq!(poller.poll_hospital(&hospital, &rx).await.unwrap(), 2);
    // Nothing left to publish on the next tick
    assert_eq!(poller.poll_hospital(&hospital, &rx).await.unwrap(), 0);
    assert_eq!(poller.status().await.unwrap().detected_today, 2);

    let events = published_events(&redis).await;
    assert_eq!(events.len(), 2);

    let occurrences = OccurrenceService::new(PgOccurrenceRepository::new(db.connection()));
    let notifier = Arc::new(RecordingNotifier {
        service: occurrences.clone(),
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(RuleCache::new(
        Arc::new(PgTriageRuleRepository::new(db.connection())),
        StdDuration::from_secs(60),
        6,
    ));
    let processor = TriageProcessor::new(
        records,
        hospitals,
        Arc::new(occurrences.clone()),
        cache,
        notifier.clone(),
    );

    for event in &events {
        processor.process(event).await.unwrap();
    }
    // Redelivery of every event changes nothing
    for event in &events {
        processor.process(event).await.unwrap();
    }

    let stats = processor.stats();
    assert_eq!((stats.eligible, stats.rejected), (1, 1));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

    let occurrence = occurrences.find_by_record(eligible).await.unwrap().unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Pending);
    assert_eq!(occurrence.priority_score, 100);
    assert!(occurrence.notified_at.is_some());
    assert_ne!(occurrence.masked_name, "Paulo Mendes");

    let history = occurrences
        .history(TenantScope::tenant(tenant_id), occurrence.id)
        .await
        .unwrap();
    let actions: Vec<_> = history.iter().map(|h| h.action.as_str()).collect();
    assert_eq!(actions, vec!["created automatically", "notification sent"]);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_rule_service_round_trip() {
    let db = TestDatabase::new().await;
    let tenant_id = db.seed_tenant("rules").await;
    let other_tenant = db.seed_tenant("rules-other").await;

    let repo = Arc::new(PgTriageRuleRepository::new(db.connection()));
    let cache = Arc::new(RuleCache::new(repo.clone(), StdDuration::from_secs(300), 6));
    let service = TriageRuleService::new(repo).with_cache(cache.clone());
    let scope = TenantScope::tenant(tenant_id);

    assert!(cache.rules_for(tenant_id).await.is_empty());

    let rule = service
        .create(
            scope,
            CreateRule {
                name: "Window".to_string(),
                description: None,
                definition: json!({"tipo": "janela_horas", "valor": 4}),
                priority: 1,
            },
        )
        .await
        .unwrap();

    let rules = cache.rules_for(tenant_id).await;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].kind, RuleKind::WindowHours(4));

    let err = service
        .deactivate(TenantScope::tenant(other_tenant), rule.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::RuleNotFound(_)));

    let deactivated = service.deactivate(scope, rule.id).await.unwrap();
    assert!(!deactivated.active);
    assert!(cache.rules_for(tenant_id).await.is_empty());
    assert_eq!(service.list(scope).await.unwrap().len(), 1);
}
