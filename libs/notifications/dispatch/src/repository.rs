use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DispatchResult;
use crate::models::{NewNotification, Notification, Recipient};

/// Ledger of delivery attempts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn record(&self, input: NewNotification) -> DispatchResult<Notification>;

    /// Whether a sent SMS already exists for this user and occurrence
    async fn exists_sms_for(&self, occurrence_id: Uuid, user_id: Uuid) -> DispatchResult<bool>;

    async fn list_for_occurrence(&self, occurrence_id: Uuid) -> DispatchResult<Vec<Notification>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Active users of the tenant who operate occurrences at this hospital.
    ///
    /// Users pinned to a different hospital are left out.
    async fn operators_for(&self, tenant_id: Uuid, hospital_id: Uuid) -> DispatchResult<Vec<Recipient>>;
}
