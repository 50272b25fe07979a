use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_tenancy::{ScopedQuery, TenantScope};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entity::{eligible_record, hospital, triage_rule};
use crate::error::{TriageError, TriageResult};
use crate::models::{CreateRule, EligibleRecord, Hospital, RuleDefinition, UpdateRule};
use crate::repository::{EligibleRecordRepository, HospitalDirectory, TriageRuleRepository};

pub struct PgEligibleRecordRepository {
    db: DatabaseConnection,
}

impl PgEligibleRecordRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EligibleRecordRepository for PgEligibleRecordRepository {
    async fn unprocessed_for_hospital(
        &self,
        hospital_id: Uuid,
        since: DateTime<Utc>,
    ) -> TriageResult<Vec<EligibleRecord>> {
        let rows = eligible_record::Entity::find()
            .filter(eligible_record::Column::HospitalId.eq(hospital_id))
            .filter(eligible_record::Column::Processed.eq(false))
            .filter(eligible_record::Column::CreatedAt.gte(since))
            .order_by_asc(eligible_record::Column::CreatedAt)
            .order_by_asc(eligible_record::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn is_unprocessed(&self, id: Uuid) -> TriageResult<bool> {
        let n = eligible_record::Entity::find_by_id(id)
            .filter(eligible_record::Column::Processed.eq(false))
            .count(&self.db)
            .await?;
        Ok(n > 0)
    }

    async fn find(&self, id: Uuid) -> TriageResult<Option<EligibleRecord>> {
        let row = eligible_record::Entity::find_by_id(id).one(&self.db).await?;
        Ok(row.map(Into::into))
    }

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> TriageResult<bool> {
        let result = eligible_record::Entity::update_many()
            .set(eligible_record::ActiveModel {
                processed: Set(true),
                processed_at: Set(Some(at.into())),
                ..Default::default()
            })
            .filter(eligible_record::Column::Id.eq(id))
            .filter(eligible_record::Column::Processed.eq(false))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn processed_since(&self, since: DateTime<Utc>) -> TriageResult<u64> {
        let n = eligible_record::Entity::find()
            .filter(eligible_record::Column::Processed.eq(true))
            .filter(eligible_record::Column::ProcessedAt.gte(since))
            .count(&self.db)
            .await?;
        Ok(n)
    }
}

pub struct PgHospitalDirectory {
    db: DatabaseConnection,
}

impl PgHospitalDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HospitalDirectory for PgHospitalDirectory {
    async fn list_active(&self) -> TriageResult<Vec<Hospital>> {
        let rows = hospital::Entity::find()
            .filter(hospital::Column::Active.eq(true))
            .order_by_asc(hospital::Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find(&self, id: Uuid) -> TriageResult<Option<Hospital>> {
        let row = hospital::Entity::find_by_id(id).one(&self.db).await?;
        Ok(row.map(Into::into))
    }
}

pub struct PgTriageRuleRepository {
    db: DatabaseConnection,
}

impl PgTriageRuleRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TriageRuleRepository for PgTriageRuleRepository {
    async fn list_active(&self, tenant_id: Uuid) -> TriageResult<Vec<RuleDefinition>> {
        let rows = triage_rule::Entity::find()
            .filter(triage_rule::Column::TenantId.eq(tenant_id))
            .filter(triage_rule::Column::Active.eq(true))
            .order_by_desc(triage_rule::Column::Priority)
            .order_by_asc(triage_rule::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list(&self, scope: TenantScope) -> TriageResult<Vec<RuleDefinition>> {
        let rows = triage_rule::Entity::find()
            .scoped(&scope, triage_rule::Column::TenantId)
            .order_by_desc(triage_rule::Column::Active)
            .order_by_desc(triage_rule::Column::Priority)
            .order_by_asc(triage_rule::Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find(&self, scope: TenantScope, id: Uuid) -> TriageResult<Option<RuleDefinition>> {
        let row = triage_rule::Entity::find_by_id(id)
            .scoped(&scope, triage_rule::Column::TenantId)
            .one(&self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, tenant_id: Uuid, input: CreateRule) -> TriageResult<RuleDefinition> {
        let model = triage_rule::ActiveModel::from_create(tenant_id, input)
            .insert(&self.db)
            .await?;
        Ok(model.into())
    }

    async fn update(&self, id: Uuid, input: UpdateRule) -> TriageResult<RuleDefinition> {
        let existing = triage_rule::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(TriageError::RuleNotFound(id))?;

        let mut active = existing.into_active_model();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(definition) = input.definition {
            active.definition = Set(definition);
        }
        if let Some(priority) = input.priority {
            active.priority = Set(priority);
        }
        if let Some(flag) = input.active {
            active.active = Set(flag);
        }
        active.updated_at = Set(Utc::now().into());

        let model = active.update(&self.db).await?;
        Ok(model.into())
    }
}
