use async_trait::async_trait;
use core_tenancy::{Capability, CapabilitySet};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entity::{notification, user, user_preferences};
use crate::error::DispatchResult;
use crate::models::{
    NewNotification, Notification, NotificationChannel, NotificationPreferences,
    NotificationStatus, Recipient,
};
use crate::repository::{NotificationRepository, RecipientDirectory};

pub struct PgNotificationRepository {
    db: DatabaseConnection,
}

impl PgNotificationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn record(&self, input: NewNotification) -> DispatchResult<Notification> {
        let model = notification::ActiveModel::from(input).insert(&self.db).await?;
        Ok(model.into())
    }

    async fn exists_sms_for(&self, occurrence_id: Uuid, user_id: Uuid) -> DispatchResult<bool> {
        let n = notification::Entity::find()
            .filter(notification::Column::OccurrenceId.eq(occurrence_id))
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Channel.eq(NotificationChannel::Sms))
            .filter(notification::Column::Status.eq(NotificationStatus::Sent))
            .count(&self.db)
            .await?;
        Ok(n > 0)
    }

    async fn list_for_occurrence(&self, occurrence_id: Uuid) -> DispatchResult<Vec<Notification>> {
        let rows = notification::Entity::find()
            .filter(notification::Column::OccurrenceId.eq(occurrence_id))
            .order_by_asc(notification::Column::SentAt)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

pub struct PgRecipientDirectory {
    db: DatabaseConnection,
}

impl PgRecipientDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn operators_for(&self, tenant_id: Uuid, hospital_id: Uuid) -> DispatchResult<Vec<Recipient>> {
        let rows = user::Entity::find()
            .find_also_related(user_preferences::Entity)
            .filter(user::Column::TenantId.eq(tenant_id))
            .filter(user::Column::Active.eq(true))
            .filter(
                Condition::any()
                    .add(user::Column::HospitalId.is_null())
                    .add(user::Column::HospitalId.eq(hospital_id)),
            )
            .order_by_asc(user::Column::Name)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter(|(u, _)| {
                CapabilitySet::for_role(u.role, u.is_super_admin)
                    .contains(Capability::OperateOccurrences)
            })
            .map(|(u, prefs)| Recipient {
                user_id: u.id,
                name: u.name,
                email: u.email,
                mobile_phone: u.mobile_phone,
                preferences: prefs.map(Into::into).unwrap_or_else(NotificationPreferences::default),
            })
            .collect())
    }
}
