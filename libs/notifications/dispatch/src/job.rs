//! DeliveryJob - one queued message to one recipient on one channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stream_worker::StreamJob;
use uuid::Uuid;

use crate::content::OccurrenceAlert;
use crate::models::NotificationChannel;

/// Email gets 3 attempts in total
pub const EMAIL_MAX_RETRIES: u32 = 2;
pub const SMS_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    /// Email address or phone number
    pub to: String,
    pub alert: OccurrenceAlert,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl DeliveryJob {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        channel: NotificationChannel,
        to: impl Into<String>,
        alert: OccurrenceAlert,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            user_id,
            channel,
            to: to.into(),
            alert,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn occurrence_id(&self) -> Uuid {
        self.alert.occurrence_id
    }
}

impl StreamJob for DeliveryJob {
    fn job_id(&self) -> String {
        self.id.to_string()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    fn max_retries(&self) -> u32 {
        match self.channel {
            NotificationChannel::Email => EMAIL_MAX_RETRIES,
            NotificationChannel::Sms => SMS_MAX_RETRIES,
            // Live pushes are never queued
            NotificationChannel::Dashboard => 0,
        }
    }
}
