use chrono::{DateTime, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::Display;
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery channel
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "notification_channel")]
pub enum NotificationChannel {
    #[sea_orm(string_value = "dashboard")]
    Dashboard,
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "sms")]
    Sms,
}

impl FromStr for NotificationChannel {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(NotificationChannel::Dashboard),
            "email" => Ok(NotificationChannel::Email),
            "sms" => Ok(NotificationChannel::Sms),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

/// Outcome of one delivery attempt
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "notification_status")]
pub enum NotificationStatus {
    #[serde(rename = "enviado")]
    #[strum(serialize = "enviado")]
    #[sea_orm(string_value = "enviado")]
    Sent,
    #[serde(rename = "falha")]
    #[strum(serialize = "falha")]
    #[sea_orm(string_value = "falha")]
    Failed,
    #[serde(rename = "pendente")]
    #[strum(serialize = "pendente")]
    #[sea_orm(string_value = "pendente")]
    Pending,
}

impl FromStr for NotificationStatus {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enviado" => Ok(NotificationStatus::Sent),
            "falha" => Ok(NotificationStatus::Failed),
            "pendente" => Ok(NotificationStatus::Pending),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

/// Channel-specific details kept in `notifications.metadata`
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct NotificationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    /// Masked phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<String>,
}

/// A stored delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub occurrence_id: Uuid,
    pub user_id: Option<Uuid>,
    pub channel: NotificationChannel,
    pub sent_at: DateTime<Utc>,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub metadata: NotificationMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub tenant_id: Uuid,
    pub occurrence_id: Uuid,
    pub user_id: Option<Uuid>,
    pub channel: NotificationChannel,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub metadata: NotificationMetadata,
}

/// Per-user channel switches.
///
/// The dashboard channel cannot be turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreferences {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub dashboard_enabled: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            dashboard_enabled: true,
        }
    }
}

/// An operator who should hear about an occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub mobile_phone: Option<String>,
    pub preferences: NotificationPreferences,
}

impl Recipient {
    /// Queued channels this recipient wants, with the address to use
    pub fn deliveries(&self) -> Vec<(NotificationChannel, String)> {
        let mut out = Vec::with_capacity(2);
        if self.preferences.email_enabled && !self.email.trim().is_empty() {
            out.push((NotificationChannel::Email, self.email.clone()));
        }
        if self.preferences.sms_enabled
            && let Some(phone) = self.mobile_phone.as_deref().filter(|p| !p.trim().is_empty())
        {
            out.push((NotificationChannel::Sms, phone.to_string()));
        }
        out
    }
}

/// What one `notify_created` call handed off
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DispatchReport {
    pub occurrence_id: Uuid,
    pub live_published: bool,
    pub recipients: usize,
    pub emails_queued: usize,
    pub sms_queued: usize,
    pub enqueue_failures: usize,
}

impl DispatchReport {
    pub fn handed_off(&self) -> bool {
        self.live_published || self.emails_queued + self.sms_queued > 0
    }

    /// One-line summary stored in the occurrence history
    pub fn summary(&self) -> String {
        format!(
            "live: {}, email: {}, sms: {}",
            if self.live_published { "sent" } else { "failed" },
            self.emails_queued,
            self.sms_queued
        )
    }
}

/// Mask a phone number for logs and metadata, keeping the country/area
/// prefix and the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..chars.len() - 8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(prefs: NotificationPreferences, phone: Option<&str>) -> Recipient {
        Recipient {
            user_id: Uuid::new_v4(),
            name: "Ana".into(),
            email: "ana@hospital.example".into(),
            mobile_phone: phone.map(str::to_string),
            preferences: prefs,
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(NotificationStatus::Sent.to_string(), "enviado");
        assert_eq!(
            NotificationStatus::from_str("falha").unwrap(),
            NotificationStatus::Failed
        );
        assert_eq!(
            serde_json::to_value(NotificationChannel::Sms).unwrap(),
            serde_json::json!("sms")
        );
    }

    #[test]
    fn test_default_preferences_email_only() {
        let r = recipient(NotificationPreferences::default(), Some("+5511999998888"));
        assert_eq!(
            r.deliveries(),
            vec![(NotificationChannel::Email, "ana@hospital.example".to_string())]
        );
    }

    #[test]
    fn test_sms_needs_a_phone() {
        let prefs = NotificationPreferences {
            email_enabled: false,
            sms_enabled: true,
            dashboard_enabled: true,
        };
        assert!(recipient(prefs, None).deliveries().is_empty());
        assert_eq!(
            recipient(prefs, Some("+5511999998888")).deliveries(),
            vec![(NotificationChannel::Sms, "+5511999998888".to_string())]
        );
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+5511999998888"), "+55119****8888");
        assert_eq!(mask_phone("1234"), "****");
    }

    #[test]
    fn test_metadata_skips_empty_fields() {
        let metadata = NotificationMetadata {
            email_to: Some("a@b.example".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&metadata).unwrap(),
            serde_json::json!({"email_to": "a@b.example"})
        );
    }
}
