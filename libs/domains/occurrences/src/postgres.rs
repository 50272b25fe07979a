use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_tenancy::{ScopedQuery, TenantScope};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entity::{history, occurrence};
use crate::error::{OccurrenceError, OccurrenceResult};
use crate::models::{
    HistoryAction, HistoryEntry, ListQuery, NewHistoryEntry, Occurrence, OccurrenceDraft,
    OccurrenceMetrics, OccurrenceSort, OccurrenceStatus, Outcome, StatusChange,
};
use crate::repository::OccurrenceRepository;

pub struct PgOccurrenceRepository {
    db: DatabaseConnection,
}

impl PgOccurrenceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Map a unique violation to `on_unique`, anything else to a database error.
fn unique_violation_as(err: DbErr, on_unique: OccurrenceError) -> OccurrenceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => on_unique,
        _ => OccurrenceError::Database(err),
    }
}

#[async_trait]
impl OccurrenceRepository for PgOccurrenceRepository {
    async fn create(&self, draft: OccurrenceDraft) -> OccurrenceResult<Occurrence> {
        let record_id = draft.occurrence.record_id;
        let txn = self.db.begin().await?;

        let model = occurrence::ActiveModel::from(draft)
            .insert(&txn)
            .await
            .map_err(|e| unique_violation_as(e, OccurrenceError::DuplicateRecord(record_id)))?;

        history::ActiveModel::from(NewHistoryEntry {
            occurrence_id: model.id,
            tenant_id: model.tenant_id,
            user_id: None,
            action: HistoryAction::Created,
            previous_status: None,
            new_status: Some(OccurrenceStatus::Pending),
            notes: None,
            outcome: None,
        })
        .insert(&txn)
        .await?;

        txn.commit().await?;

        tracing::info!(occurrence_id = %model.id, record_id = %record_id, "Created occurrence");
        Ok(model.into())
    }

    async fn find_by_record(&self, record_id: Uuid) -> OccurrenceResult<Option<Occurrence>> {
        let model = occurrence::Entity::find()
            .filter(occurrence::Column::RecordId.eq(record_id))
            .one(&self.db)
            .await?;
        Ok(model.map(Into::into))
    }

    async fn find(&self, scope: TenantScope, id: Uuid) -> OccurrenceResult<Option<Occurrence>> {
        let model = occurrence::Entity::find_by_id(id)
            .scoped(&scope, occurrence::Column::TenantId)
            .one(&self.db)
            .await?;
        Ok(model.map(Into::into))
    }

    async fn list(
        &self,
        scope: TenantScope,
        query: ListQuery,
    ) -> OccurrenceResult<(Vec<Occurrence>, u64)> {
        let mut select = occurrence::Entity::find().scoped(&scope, occurrence::Column::TenantId);

        if let Some(status) = query.status {
            select = select.filter(occurrence::Column::Status.eq(status));
        }
        if let Some(hospital_id) = query.hospital_id {
            select = select.filter(occurrence::Column::HospitalId.eq(hospital_id));
        }
        if let Some(from) = query.created_from {
            select = select.filter(occurrence::Column::CreatedAt.gte(from));
        }
        if let Some(before) = query.created_before {
            select = select.filter(occurrence::Column::CreatedAt.lt(before));
        }

        select = match query.sort {
            OccurrenceSort::PriorityScore => select
                .order_by_desc(occurrence::Column::PriorityScore)
                .order_by_asc(occurrence::Column::CreatedAt),
            OccurrenceSort::CreatedAt => select.order_by_desc(occurrence::Column::CreatedAt),
            OccurrenceSort::DeathTime => select.order_by_asc(occurrence::Column::DeathTime),
        }
        .order_by_asc(occurrence::Column::Id);

        let paginator = select.paginate(&self.db, query.page_size);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(query.page.saturating_sub(1)).await?;

        Ok((models.into_iter().map(Into::into).collect(), total))
    }

    async fn history(&self, scope: TenantScope, occurrence_id: Uuid) -> OccurrenceResult<Vec<HistoryEntry>> {
        let rows = history::Entity::find()
            .filter(history::Column::OccurrenceId.eq(occurrence_id))
            .scoped(&scope, history::Column::TenantId)
            .order_by_asc(history::Column::CreatedAt)
            .order_by_asc(history::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_outcome(&self, occurrence_id: Uuid) -> OccurrenceResult<Option<Outcome>> {
        let row = history::Entity::find()
            .filter(history::Column::OccurrenceId.eq(occurrence_id))
            .filter(history::Column::Outcome.is_not_null())
            .order_by_desc(history::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(row.and_then(|r| r.outcome))
    }

    async fn apply_status_change(&self, change: StatusChange) -> OccurrenceResult<Occurrence> {
        let id = change.occurrence_id;
        let txn = self.db.begin().await?;

        let result = occurrence::Entity::update_many()
            .set(occurrence::ActiveModel {
                status: Set(change.to),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(occurrence::Column::Id.eq(id))
            .filter(occurrence::Column::Status.eq(change.from))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            // Dropping the transaction rolls it back
            return Err(OccurrenceError::Conflict(id));
        }

        history::ActiveModel::from(change.history_entry())
            .insert(&txn)
            .await?;

        let model = occurrence::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(OccurrenceError::NotFound(id))?;

        txn.commit().await?;
        Ok(model.into())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> OccurrenceResult<HistoryEntry> {
        let is_outcome = entry.action == HistoryAction::OutcomeRegistered;
        let model = history::ActiveModel::from(entry)
            .insert(&self.db)
            .await
            .map_err(|e| {
                if is_outcome {
                    unique_violation_as(e, OccurrenceError::OutcomeAlreadyRegistered)
                } else {
                    OccurrenceError::Database(e)
                }
            })?;
        Ok(model.into())
    }

    async fn mark_notified(
        &self,
        at: DateTime<Utc>,
        entry: NewHistoryEntry,
    ) -> OccurrenceResult<bool> {
        let txn = self.db.begin().await?;

        let result = occurrence::Entity::update_many()
            .set(occurrence::ActiveModel {
                notified_at: Set(Some(at.into())),
                ..Default::default()
            })
            .filter(occurrence::Column::Id.eq(entry.occurrence_id))
            .filter(occurrence::Column::NotifiedAt.is_null())
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        history::ActiveModel::from(entry).insert(&txn).await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn metrics(&self, scope: TenantScope) -> OccurrenceResult<OccurrenceMetrics> {
        let counts: Vec<(OccurrenceStatus, i64)> = occurrence::Entity::find()
            .select_only()
            .column(occurrence::Column::Status)
            .column_as(Expr::cust("COUNT(*)"), "count")
            .group_by(occurrence::Column::Status)
            .scoped(&scope, occurrence::Column::TenantId)
            .into_tuple()
            .all(&self.db)
            .await?;

        let notified = occurrence::Entity::find()
            .filter(occurrence::Column::NotifiedAt.is_not_null())
            .scoped(&scope, occurrence::Column::TenantId)
            .count(&self.db)
            .await?;

        let avg: Option<Option<f64>> = occurrence::Entity::find()
            .select_only()
            .column_as(
                Expr::cust("AVG(EXTRACT(EPOCH FROM (notified_at - created_at)))::float8"),
                "avg_secs",
            )
            .filter(occurrence::Column::NotifiedAt.is_not_null())
            .scoped(&scope, occurrence::Column::TenantId)
            .into_tuple()
            .one(&self.db)
            .await?;

        let by_status: BTreeMap<String, u64> = counts
            .into_iter()
            .map(|(status, n)| (status.to_string(), n.max(0) as u64))
            .collect();

        Ok(OccurrenceMetrics {
            total: by_status.values().sum(),
            by_status,
            notified,
            avg_time_to_notification_secs: avg.flatten(),
        })
    }
}
