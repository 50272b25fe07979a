use crate::models::{NewNotification, NotificationChannel, NotificationMetadata, NotificationStatus};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub occurrence_id: Uuid,
    pub user_id: Option<Uuid>,
    pub channel: NotificationChannel,
    pub sent_at: DateTimeWithTimeZone,
    pub status: NotificationStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: NotificationMetadata,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::Notification {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            occurrence_id: model.occurrence_id,
            user_id: model.user_id,
            channel: model.channel,
            sent_at: model.sent_at.into(),
            status: model.status,
            error_message: model.error_message,
            metadata: model.metadata,
        }
    }
}

impl From<NewNotification> for ActiveModel {
    fn from(input: NewNotification) -> Self {
        ActiveModel {
            id: Set(Uuid::now_v7()),
            tenant_id: Set(input.tenant_id),
            occurrence_id: Set(input.occurrence_id),
            user_id: Set(input.user_id),
            channel: Set(input.channel),
            sent_at: Set(chrono::Utc::now().into()),
            status: Set(input.status),
            error_message: Set(input.error_message),
            metadata: Set(input.metadata),
        }
    }
}
