use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_tenancy::{Capability, Principal, TenantScope};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{OccurrenceError, OccurrenceResult};
use crate::events::StatusListener;
use crate::masking::mask_name;
use crate::models::{
    HistoryAction, HistoryEntry, ListQuery, MAX_PAGE_SIZE, NewHistoryEntry, NewOccurrence,
    Occurrence, OccurrenceDetail, OccurrenceDraft, OccurrenceFilter, OccurrenceMetrics,
    OccurrenceStatus, OccurrenceSummary, Outcome, DEFAULT_PAGE_SIZE, Paginated, StatusChange,
};
use crate::repository::OccurrenceRepository;
use crate::window::window_expires_at;

/// Occurrence lifecycle: creation, guarded transitions, outcomes and reads.
pub struct OccurrenceService<R: OccurrenceRepository> {
    repository: Arc<R>,
    listener: Option<Arc<dyn StatusListener>>,
}

impl<R: OccurrenceRepository> Clone for OccurrenceService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            listener: self.listener.clone(),
        }
    }
}

impl<R: OccurrenceRepository> OccurrenceService<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository: Arc::new(repository),
            listener: None,
        }
    }

    /// Receive every committed status change (live feed)
    pub fn with_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Create a pending occurrence for an eligible record.
    #[instrument(skip(self, input), fields(record_id = %input.record_id, tenant_id = %input.tenant_id))]
    pub async fn create(&self, input: NewOccurrence) -> OccurrenceResult<Occurrence> {
        let draft = OccurrenceDraft {
            masked_name: mask_name(&input.payload.patient_name),
            window_expires_at: window_expires_at(input.death_time),
            occurrence: input,
        };
        self.repository.create(draft).await
    }

    pub async fn exists_for_record(&self, record_id: Uuid) -> OccurrenceResult<bool> {
        Ok(self.repository.find_by_record(record_id).await?.is_some())
    }

    pub async fn find_by_record(&self, record_id: Uuid) -> OccurrenceResult<Option<Occurrence>> {
        self.repository.find_by_record(record_id).await
    }

    /// Out-of-scope rows are reported as not found.
    pub async fn get(&self, scope: TenantScope, id: Uuid) -> OccurrenceResult<Occurrence> {
        self.repository
            .find(scope, id)
            .await?
            .ok_or(OccurrenceError::NotFound(id))
    }

    #[instrument(skip(self, filter), fields(tenant_id = ?scope.tenant_id))]
    pub async fn list(
        &self,
        scope: TenantScope,
        filter: OccurrenceFilter,
    ) -> OccurrenceResult<Paginated<OccurrenceSummary>> {
        let query = list_query(filter)?;
        let (occurrences, total) = self.repository.list(scope, query.clone()).await?;
        let now = Utc::now();
        let items = occurrences
            .iter()
            .map(|o| OccurrenceSummary::from_occurrence(o, now))
            .collect();
        Ok(Paginated::new(items, total, query.page, query.page_size))
    }

    /// Detail view; the unmasked payload is included only for operators.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn get_detail(
        &self,
        scope: TenantScope,
        id: Uuid,
        principal: &Principal,
    ) -> OccurrenceResult<OccurrenceDetail> {
        let occurrence = self.get(scope, id).await?;
        let summary = OccurrenceSummary::from_occurrence(&occurrence, Utc::now());

        let full_payload = if principal.can(Capability::OperateOccurrences) {
            tracing::info!(
                occurrence_id = %id,
                tenant_id = %occurrence.tenant_id,
                "Full occurrence payload accessed"
            );
            Some(occurrence.full_payload)
        } else {
            None
        };

        Ok(OccurrenceDetail {
            summary,
            full_payload,
        })
    }

    pub async fn history(&self, scope: TenantScope, id: Uuid) -> OccurrenceResult<Vec<HistoryEntry>> {
        self.get(scope, id).await?;
        self.repository.history(scope, id).await
    }

    /// Move an occurrence along one lifecycle edge.
    ///
    /// Completing requires a registered outcome, which is copied onto the
    /// completion row.
    #[instrument(skip(self, notes), fields(occurrence_id = %id, target = %target))]
    pub async fn transition(
        &self,
        scope: TenantScope,
        id: Uuid,
        target: OccurrenceStatus,
        actor: Option<Uuid>,
        notes: Option<String>,
    ) -> OccurrenceResult<Occurrence> {
        let occurrence = self.get(scope, id).await?;
        let current = occurrence.status;

        if !current.can_transition_to(target) {
            return Err(OccurrenceError::InvalidTransition {
                current,
                target,
                allowed: current.allowed_transitions().to_vec(),
            });
        }

        let outcome = if target == OccurrenceStatus::Completed {
            let outcome = self
                .repository
                .latest_outcome(id)
                .await?
                .ok_or(OccurrenceError::OutcomeRequired)?;
            Some(outcome)
        } else {
            None
        };

        let updated = self
            .repository
            .apply_status_change(StatusChange {
                occurrence_id: id,
                tenant_id: occurrence.tenant_id,
                from: current,
                to: target,
                actor,
                notes,
                outcome,
            })
            .await?;

        tracing::info!(
            occurrence_id = %id,
            previous = %current,
            status = %updated.status,
            "Occurrence status changed"
        );

        if let Some(listener) = &self.listener {
            listener.status_changed(&updated, current).await;
        }

        Ok(updated)
    }

    /// Record the outcome required before completion. Allowed once, while
    /// the occurrence is accepted or declined.
    #[instrument(skip(self, notes), fields(occurrence_id = %id, outcome = %outcome))]
    pub async fn register_outcome(
        &self,
        scope: TenantScope,
        id: Uuid,
        outcome: Outcome,
        notes: Option<String>,
        actor: Option<Uuid>,
    ) -> OccurrenceResult<HistoryEntry> {
        let occurrence = self.get(scope, id).await?;

        if !occurrence.status.accepts_outcome() {
            return Err(OccurrenceError::OutcomeNotAllowed(occurrence.status));
        }
        // Fast path only. The partial unique index on outcome rows is the real
        // guard: a concurrent second insert surfaces as OutcomeAlreadyRegistered (409).
        if self.repository.latest_outcome(id).await?.is_some() {
            return Err(OccurrenceError::OutcomeAlreadyRegistered);
        }

        self.repository
            .append_history(NewHistoryEntry {
                occurrence_id: id,
                tenant_id: occurrence.tenant_id,
                user_id: actor,
                action: HistoryAction::OutcomeRegistered,
                previous_status: None,
                new_status: None,
                notes,
                outcome: Some(outcome),
            })
            .await
    }

    /// Stamp the first notification time and log it in the ledger.
    ///
    /// Later calls are no-ops and return `false`.
    pub async fn mark_notified(
        &self,
        occurrence: &Occurrence,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> OccurrenceResult<bool> {
        self.repository
            .mark_notified(
                at,
                NewHistoryEntry {
                    occurrence_id: occurrence.id,
                    tenant_id: occurrence.tenant_id,
                    user_id: None,
                    action: HistoryAction::NotificationSent,
                    previous_status: None,
                    new_status: None,
                    notes,
                    outcome: None,
                },
            )
            .await
    }

    pub async fn metrics(&self, scope: TenantScope) -> OccurrenceResult<OccurrenceMetrics> {
        self.repository.metrics(scope).await
    }
}

/// Validate paging and resolve date bounds.
fn list_query(filter: OccurrenceFilter) -> OccurrenceResult<ListQuery> {
    let page = filter.page.unwrap_or(1);
    if page == 0 {
        return Err(OccurrenceError::Validation("page starts at 1".to_string()));
    }
    let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(OccurrenceError::Validation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let created_from = filter
        .date_from
        .as_deref()
        .map(|raw| parse_bound(raw, false))
        .transpose()?;
    let created_before = filter
        .date_to
        .as_deref()
        .map(|raw| parse_bound(raw, true))
        .transpose()?;

    if matches!((created_from, created_before), (Some(from), Some(before)) if from >= before) {
        return Err(OccurrenceError::Validation(
            "date_from must be before date_to".to_string(),
        ));
    }

    Ok(ListQuery {
        status: filter.status,
        hospital_id: filter.hospital_id,
        created_from,
        created_before,
        page,
        page_size,
        sort: filter.sort.unwrap_or_default(),
    })
}

/// RFC3339 or a calendar day. Upper bounds are turned exclusive: a day
/// covers all of it, a timestamp covers itself.
fn parse_bound(raw: &str, upper: bool) -> OccurrenceResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        let ts = ts.with_timezone(&Utc);
        return Ok(if upper { ts + Duration::microseconds(1) } else { ts });
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| OccurrenceError::Validation(format!("invalid date: {raw}")))?;
    let day = if upper { day + Duration::days(1) } else { day };
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc())
}
