//! Triage consumer: turns detection events into occurrences.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_occurrences::{
    NewOccurrence, Occurrence, OccurrenceError, OccurrenceNotifier, OccurrenceRepository,
    OccurrenceResult, OccurrenceService,
};
use metrics::counter;
use serde::Serialize;
use stream_worker::{StreamError, StreamProcessor};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cache::RuleCache;
use crate::engine;
use crate::error::TriageError;
use crate::repository::{EligibleRecordRepository, HospitalDirectory};
use crate::streams::DetectionEvent;

/// The slice of the occurrence service the consumer needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OccurrenceGateway: Send + Sync {
    async fn find_by_record(&self, record_id: Uuid) -> OccurrenceResult<Option<Occurrence>>;

    async fn create(&self, input: NewOccurrence) -> OccurrenceResult<Occurrence>;
}

#[async_trait]
impl<R: OccurrenceRepository + 'static> OccurrenceGateway for OccurrenceService<R> {
    async fn find_by_record(&self, record_id: Uuid) -> OccurrenceResult<Option<Occurrence>> {
        OccurrenceService::find_by_record(self, record_id).await
    }

    async fn create(&self, input: NewOccurrence) -> OccurrenceResult<Occurrence> {
        OccurrenceService::create(self, input).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TriageStats {
    pub processed: u64,
    pub eligible: u64,
    pub rejected: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    eligible: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
}

pub struct TriageProcessor {
    records: Arc<dyn EligibleRecordRepository>,
    hospitals: Arc<dyn HospitalDirectory>,
    occurrences: Arc<dyn OccurrenceGateway>,
    rules: Arc<RuleCache>,
    notifier: Arc<dyn OccurrenceNotifier>,
    counters: Counters,
    started_at: DateTime<Utc>,
}

impl TriageProcessor {
    pub fn new(
        records: Arc<dyn EligibleRecordRepository>,
        hospitals: Arc<dyn HospitalDirectory>,
        occurrences: Arc<dyn OccurrenceGateway>,
        rules: Arc<RuleCache>,
        notifier: Arc<dyn OccurrenceNotifier>,
    ) -> Self {
        Self {
            records,
            hospitals,
            occurrences,
            rules,
            notifier,
            counters: Counters::default(),
            started_at: Utc::now(),
        }
    }

    pub fn stats(&self) -> TriageStats {
        TriageStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            eligible: self.counters.eligible.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    #[instrument(skip_all, fields(record_id = %event.record_id, tenant_id = %event.tenant_id))]
    async fn triage(&self, event: &DetectionEvent) -> Result<(), TriageError> {
        // Redelivered event: the occurrence exists, maybe without its notification
        if let Some(existing) = self.occurrences.find_by_record(event.record_id).await? {
            ensure_same_tenant(event, existing.tenant_id)?;
            if existing.notified_at.is_none() {
                info!(occurrence_id = %existing.id, "Occurrence exists but was never notified, notifying again");
                self.notify(&existing).await?;
            } else {
                debug!(occurrence_id = %existing.id, "Occurrence already exists for record, skipping");
            }
            return Ok(());
        }

        let record = self
            .records
            .find(event.record_id)
            .await?
            .ok_or(TriageError::RecordNotFound(event.record_id))?;
        let hospital = self
            .hospitals
            .find(record.hospital_id)
            .await?
            .ok_or(TriageError::HospitalNotFound(record.hospital_id))?;
        ensure_same_tenant(event, record.tenant_id)?;
        ensure_same_tenant(event, hospital.tenant_id)?;

        let rules = self.rules.rules_for(record.tenant_id).await;
        let evaluation = engine::evaluate(&record, &rules, Utc::now());
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        for alert in &evaluation.alerts {
            warn!(hospital_id = %record.hospital_id, alert = %alert, "Triage alert");
        }

        if !evaluation.eligible {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            counter!("triage_evaluations_total", "outcome" => "rejected").increment(1);
            info!(
                hospital_id = %record.hospital_id,
                reasons = ?evaluation.reasons,
                "Record rejected by triage"
            );
            return Ok(());
        }

        self.counters.eligible.fetch_add(1, Ordering::Relaxed);
        counter!("triage_evaluations_total", "outcome" => "eligible").increment(1);

        let created = self
            .occurrences
            .create(NewOccurrence {
                tenant_id: record.tenant_id,
                hospital_id: record.hospital_id,
                record_id: record.id,
                priority_score: evaluation.score,
                death_time: record.death_time,
                payload: record.to_payload(&hospital.name),
            })
            .await;

        let occurrence = match created {
            Ok(occurrence) => occurrence,
            Err(OccurrenceError::DuplicateRecord(record_id)) => {
                info!(record_id = %record_id, "Occurrence created concurrently by another consumer");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            occurrence_id = %occurrence.id,
            hospital_id = %occurrence.hospital_id,
            priority_score = occurrence.priority_score,
            rules_applied = ?evaluation.rules_applied,
            "Occurrence created"
        );

        self.notify(&occurrence).await
    }

    async fn notify(&self, occurrence: &Occurrence) -> Result<(), TriageError> {
        self.notifier.notify_created(occurrence).await.map_err(|e| {
            TriageError::Stream(StreamError::transient(format!(
                "notification hand-off failed for occurrence {}: {}",
                occurrence.id, e
            )))
        })
    }
}

/// The event, the record and its hospital must agree on the tenant;
/// anything else is corrupt data and nothing is written for it.
fn ensure_same_tenant(event: &DetectionEvent, stored_tenant: Uuid) -> Result<(), TriageError> {
    if event.tenant_id == stored_tenant {
        return Ok(());
    }
    error!(
        record_id = %event.record_id,
        event_tenant = %event.tenant_id,
        stored_tenant = %stored_tenant,
        "Detection event tenant does not match stored data"
    );
    Err(TriageError::TenantMismatch {
        record_id: event.record_id,
        event_tenant: event.tenant_id,
        stored_tenant,
    })
}

/// Storage and hand-off failures are retried; a missing record or hospital,
/// or one belonging to another tenant, never will be.
fn to_stream_error(err: TriageError) -> StreamError {
    match err {
        TriageError::RecordNotFound(_)
        | TriageError::HospitalNotFound(_)
        | TriageError::TenantMismatch { .. } => StreamError::permanent(err.to_string()),
        TriageError::Stream(e) => e,
        other => StreamError::transient(other.to_string()),
    }
}

#[async_trait]
impl StreamProcessor<DetectionEvent> for TriageProcessor {
    async fn process(&self, event: &DetectionEvent) -> Result<(), StreamError> {
        self.triage(event).await.map_err(|e| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            to_stream_error(e)
        })
    }

    fn name(&self) -> &'static str {
        "triage-processor"
    }

    async fn on_dead_letter(&self, event: &DetectionEvent, error: &StreamError) {
        warn!(
            record_id = %event.record_id,
            hospital_id = %event.hospital_id,
            retry_count = event.retry_count,
            error = %error,
            "Detection event dead-lettered"
        );
    }
}
