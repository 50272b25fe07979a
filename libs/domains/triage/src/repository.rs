use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_tenancy::TenantScope;
use uuid::Uuid;

use crate::error::TriageResult;
use crate::models::{CreateRule, EligibleRecord, Hospital, RuleDefinition, UpdateRule};

/// The eligible-record feed, as seen by the poller and the triage consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EligibleRecordRepository: Send + Sync {
    /// Unprocessed records of one hospital created at or after `since`, oldest first
    async fn unprocessed_for_hospital(
        &self,
        hospital_id: Uuid,
        since: DateTime<Utc>,
    ) -> TriageResult<Vec<EligibleRecord>>;

    async fn is_unprocessed(&self, id: Uuid) -> TriageResult<bool>;

    async fn find(&self, id: Uuid) -> TriageResult<Option<EligibleRecord>>;

    /// `processed = true` only if still unprocessed; returns whether this call flipped it
    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> TriageResult<bool>;

    /// Records marked processed at or after `since`
    async fn processed_since(&self, since: DateTime<Utc>) -> TriageResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HospitalDirectory: Send + Sync {
    async fn list_active(&self) -> TriageResult<Vec<Hospital>>;

    async fn find(&self, id: Uuid) -> TriageResult<Option<Hospital>>;
}

/// Stored rule documents. Rules are deactivated, never deleted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TriageRuleRepository: Send + Sync {
    /// Active rules of a tenant, highest priority first
    async fn list_active(&self, tenant_id: Uuid) -> TriageResult<Vec<RuleDefinition>>;

    /// Every rule visible to the scope, active or not
    async fn list(&self, scope: TenantScope) -> TriageResult<Vec<RuleDefinition>>;

    async fn find(&self, scope: TenantScope, id: Uuid) -> TriageResult<Option<RuleDefinition>>;

    async fn create(&self, tenant_id: Uuid, input: CreateRule) -> TriageResult<RuleDefinition>;

    async fn update(&self, id: Uuid, input: UpdateRule) -> TriageResult<RuleDefinition>;
}
