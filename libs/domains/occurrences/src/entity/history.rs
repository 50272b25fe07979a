use crate::models::{NewHistoryEntry, OccurrenceStatus, Outcome};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

/// Sea-ORM entity for the append-only `occurrence_history` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "occurrence_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: Option<OccurrenceStatus>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub outcome: Option<Outcome>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::occurrence::Entity",
        from = "Column::OccurrenceId",
        to = "super::occurrence::Column::Id"
    )]
    Occurrence,
}

impl Related<super::occurrence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Occurrence.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::HistoryEntry {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            occurrence_id: model.occurrence_id,
            user_id: model.user_id,
            action: model.action,
            previous_status: model.previous_status,
            new_status: model.new_status,
            notes: model.notes,
            outcome: model.outcome,
            created_at: model.created_at.into(),
        }
    }
}

impl From<NewHistoryEntry> for ActiveModel {
    fn from(entry: NewHistoryEntry) -> Self {
        ActiveModel {
            id: Set(Uuid::now_v7()),
            occurrence_id: Set(entry.occurrence_id),
            tenant_id: Set(entry.tenant_id),
            user_id: Set(entry.user_id),
            action: Set(entry.action.to_string()),
            previous_status: Set(entry.previous_status),
            new_status: Set(entry.new_status),
            notes: Set(entry.notes),
            outcome: Set(entry.outcome),
            created_at: Set(chrono::Utc::now().into()),
        }
    }
}
