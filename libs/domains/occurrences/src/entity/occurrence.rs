use crate::models::{OccurrenceDraft, OccurrencePayload, OccurrenceStatus};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

/// Sea-ORM entity for the `occurrences` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "occurrences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    #[sea_orm(unique)]
    pub record_id: Uuid,
    pub status: OccurrenceStatus,
    pub priority_score: i32,
    pub masked_name: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub full_payload: OccurrencePayload,
    pub death_time: DateTimeWithTimeZone,
    pub window_expires_at: DateTimeWithTimeZone,
    pub notified_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::history::Entity")]
    History,
}

impl Related<super::history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::Occurrence {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            hospital_id: model.hospital_id,
            record_id: model.record_id,
            status: model.status,
            priority_score: model.priority_score,
            masked_name: model.masked_name,
            full_payload: model.full_payload,
            death_time: model.death_time.into(),
            window_expires_at: model.window_expires_at.into(),
            notified_at: model.notified_at.map(Into::into),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

// New occurrences always start pending
impl From<OccurrenceDraft> for ActiveModel {
    fn from(draft: OccurrenceDraft) -> Self {
        let now = chrono::Utc::now();
        let input = draft.occurrence;
        ActiveModel {
            id: Set(Uuid::now_v7()),
            tenant_id: Set(input.tenant_id),
            hospital_id: Set(input.hospital_id),
            record_id: Set(input.record_id),
            status: Set(OccurrenceStatus::Pending),
            priority_score: Set(input.priority_score),
            masked_name: Set(draft.masked_name),
            full_payload: Set(input.payload),
            death_time: Set(input.death_time.into()),
            window_expires_at: Set(draft.window_expires_at.into()),
            notified_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}
