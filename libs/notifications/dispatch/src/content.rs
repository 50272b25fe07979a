//! Message bodies for the queued channels.

use chrono::{DateTime, Utc};
use domain_occurrences::{Occurrence, format_remaining, time_remaining};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::EmailMessage;

pub const SMS_MAX_CHARS: usize = 160;

const ELLIPSIS: &str = "...";

/// The occurrence facts a delivery needs, captured at dispatch time.
///
/// Never carries the patient name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceAlert {
    pub occurrence_id: Uuid,
    pub hospital_name: String,
    #[serde(default)]
    pub sector: Option<String>,
    pub age_at_death: i32,
    pub priority_score: i32,
    pub window_expires_at: DateTime<Utc>,
}

impl OccurrenceAlert {
    pub fn from_occurrence(occurrence: &Occurrence) -> Self {
        Self {
            occurrence_id: occurrence.id,
            hospital_name: occurrence.hospital_name().to_string(),
            sector: occurrence.sector().map(str::to_string),
            age_at_death: occurrence.full_payload.age_at_death,
            priority_score: occurrence.priority_score,
            window_expires_at: occurrence.window_expires_at,
        }
    }

    /// Time left, computed when the message is rendered rather than queued
    pub fn time_remaining(&self, now: DateTime<Utc>) -> String {
        format_remaining(time_remaining(self.window_expires_at, now))
    }

    pub fn sector_label(&self) -> &str {
        self.sector.as_deref().unwrap_or("not informed")
    }

    pub fn link(&self, dashboard_base_url: &str) -> String {
        format!("{dashboard_base_url}/occurrences/{}", self.occurrence_id)
    }
}

pub fn email_subject(hospital_name: &str) -> String {
    format!("[URGENT] New eligible occurrence - {hospital_name}")
}

pub fn render_email(
    alert: &OccurrenceAlert,
    to: &str,
    dashboard_base_url: &str,
    now: DateTime<Utc>,
) -> EmailMessage {
    let body_text = format!(
        "A new eligible occurrence needs the coordination team.\n\
         \n\
         Hospital: {hospital}\n\
         Sector: {sector}\n\
         Age: {age}\n\
         Time remaining: {remaining}\n\
         Priority: {priority}\n\
         \n\
         Open the occurrence: {link}\n",
        hospital = alert.hospital_name,
        sector = alert.sector_label(),
        age = alert.age_at_death,
        remaining = alert.time_remaining(now),
        priority = alert.priority_score,
        link = alert.link(dashboard_base_url),
    );

    EmailMessage {
        to: to.to_string(),
        subject: email_subject(&alert.hospital_name),
        body_text,
    }
}

fn sms_text(hospital: &str, alert: &OccurrenceAlert, remaining: &str, link: &str) -> String {
    format!(
        "[VIGIL] URGENT eligible occurrence. Hosp: {hospital} Age: {age} Window: {remaining} left. {link}",
        age = alert.age_at_death,
    )
}

/// At most [`SMS_MAX_CHARS`] characters. The hospital name is shortened
/// first; only if that is not enough is the whole text cut.
pub fn render_sms(alert: &OccurrenceAlert, dashboard_base_url: &str, now: DateTime<Utc>) -> String {
    let remaining = alert.time_remaining(now);
    let link = alert.link(dashboard_base_url);

    let full = sms_text(&alert.hospital_name, alert, &remaining, &link);
    let len = full.chars().count();
    if len <= SMS_MAX_CHARS {
        return full;
    }

    let hospital_len = alert.hospital_name.chars().count();
    let excess = len - SMS_MAX_CHARS + ELLIPSIS.len();
    let keep = hospital_len.saturating_sub(excess);
    let hospital: String = alert.hospital_name.chars().take(keep).collect::<String>() + ELLIPSIS;
    let shortened = sms_text(&hospital, alert, &remaining, &link);
    if shortened.chars().count() <= SMS_MAX_CHARS {
        return shortened;
    }

    let mut cut: String = shortened
        .chars()
        .take(SMS_MAX_CHARS - ELLIPSIS.len())
        .collect();
    cut.push_str(ELLIPSIS);
    cut
}
