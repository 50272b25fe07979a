use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_tenancy::TenantScope;
use uuid::Uuid;

use crate::error::OccurrenceResult;
use crate::models::{
    HistoryEntry, ListQuery, NewHistoryEntry, Occurrence, OccurrenceDraft, OccurrenceMetrics,
    Outcome, StatusChange,
};

/// Persistence for occurrences and their history ledger.
///
/// Every read that serves a caller takes a [`TenantScope`]; the pipeline-only
/// lookups (`find_by_record`, `mark_notified`) run below the tenant boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OccurrenceRepository: Send + Sync {
    /// Insert the occurrence and its "created automatically" row in one transaction.
    ///
    /// Fails with `DuplicateRecord` when the record already has an occurrence.
    async fn create(&self, draft: OccurrenceDraft) -> OccurrenceResult<Occurrence>;

    async fn find_by_record(&self, record_id: Uuid) -> OccurrenceResult<Option<Occurrence>>;

    async fn find(&self, scope: TenantScope, id: Uuid) -> OccurrenceResult<Option<Occurrence>>;

    /// One page plus the total number of matches
    async fn list(
        &self,
        scope: TenantScope,
        query: ListQuery,
    ) -> OccurrenceResult<(Vec<Occurrence>, u64)>;

    /// Ledger rows, oldest first
    async fn history(&self, scope: TenantScope, occurrence_id: Uuid) -> OccurrenceResult<Vec<HistoryEntry>>;

    async fn latest_outcome(&self, occurrence_id: Uuid) -> OccurrenceResult<Option<Outcome>>;

    /// Compare-and-set the status and append the ledger row atomically.
    ///
    /// Fails with `Conflict` when the stored status is no longer `change.from`.
    async fn apply_status_change(&self, change: StatusChange) -> OccurrenceResult<Occurrence>;

    async fn append_history(&self, entry: NewHistoryEntry) -> OccurrenceResult<HistoryEntry>;

    /// Stamp `notified_at` if unset and append `entry` in the same
    /// transaction; returns whether this call set it
    async fn mark_notified(
        &self,
        at: DateTime<Utc>,
        entry: NewHistoryEntry,
    ) -> OccurrenceResult<bool>;

    async fn metrics(&self, scope: TenantScope) -> OccurrenceResult<OccurrenceMetrics>;
}
