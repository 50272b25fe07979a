use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::window;

/// Occurrence lifecycle status
///
/// ```text
/// Pending ──► InProgress ──► Accepted ──► Completed
///    │             │   └────► Declined
///    └─────────────┴──────┴──► Cancelled
/// ```
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "occurrence_status")]
pub enum OccurrenceStatus {
    #[serde(rename = "pendente")]
    #[strum(serialize = "pendente")]
    #[sea_orm(string_value = "pendente")]
    Pending,
    #[serde(rename = "em_andamento")]
    #[strum(serialize = "em_andamento")]
    #[sea_orm(string_value = "em_andamento")]
    InProgress,
    #[serde(rename = "aceita")]
    #[strum(serialize = "aceita")]
    #[sea_orm(string_value = "aceita")]
    Accepted,
    #[serde(rename = "recusada")]
    #[strum(serialize = "recusada")]
    #[sea_orm(string_value = "recusada")]
    Declined,
    #[serde(rename = "concluida")]
    #[strum(serialize = "concluida")]
    #[sea_orm(string_value = "concluida")]
    Completed,
    #[serde(rename = "cancelada")]
    #[strum(serialize = "cancelada")]
    #[sea_orm(string_value = "cancelada")]
    Cancelled,
}

impl OccurrenceStatus {
    /// Statuses reachable from `self` through one edge.
    pub fn allowed_transitions(self) -> &'static [OccurrenceStatus] {
        use OccurrenceStatus::*;
        match self {
            Pending => &[InProgress, Cancelled],
            InProgress => &[Accepted, Declined, Cancelled],
            Accepted => &[Completed, Cancelled],
            Declined | Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: OccurrenceStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether an outcome may be registered while in this status.
    pub fn accepts_outcome(self) -> bool {
        matches!(self, OccurrenceStatus::Accepted | OccurrenceStatus::Declined)
    }
}

impl FromStr for OccurrenceStatus {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendente" => Ok(OccurrenceStatus::Pending),
            "em_andamento" => Ok(OccurrenceStatus::InProgress),
            "aceita" => Ok(OccurrenceStatus::Accepted),
            "recusada" => Ok(OccurrenceStatus::Declined),
            "concluida" => Ok(OccurrenceStatus::Completed),
            "cancelada" => Ok(OccurrenceStatus::Cancelled),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

/// Terminal classification required before completion
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "occurrence_outcome")]
pub enum Outcome {
    #[serde(rename = "sucesso_captacao", alias = "sucesso")]
    #[strum(to_string = "sucesso_captacao", serialize = "sucesso")]
    #[sea_orm(string_value = "sucesso_captacao")]
    CaptureSuccess,
    #[serde(rename = "familia_recusou")]
    #[strum(serialize = "familia_recusou")]
    #[sea_orm(string_value = "familia_recusou")]
    FamilyRefused,
    #[serde(rename = "contraindicacao_medica")]
    #[strum(serialize = "contraindicacao_medica")]
    #[sea_orm(string_value = "contraindicacao_medica")]
    MedicalContraindication,
    #[serde(rename = "tempo_excedido")]
    #[strum(serialize = "tempo_excedido")]
    #[sea_orm(string_value = "tempo_excedido")]
    TimeExceeded,
    #[serde(rename = "outro")]
    #[strum(serialize = "outro")]
    #[sea_orm(string_value = "outro")]
    Other,
}

impl FromStr for Outcome {
    type Err = strum::ParseError;

    /// Accepts the short `sucesso` form next to the stored `sucesso_captacao`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sucesso_captacao" | "sucesso" => Ok(Outcome::CaptureSuccess),
            "familia_recusou" => Ok(Outcome::FamilyRefused),
            "contraindicacao_medica" => Ok(Outcome::MedicalContraindication),
            "tempo_excedido" => Ok(Outcome::TimeExceeded),
            "outro" => Ok(Outcome::Other),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

/// Label written to `occurrence_history.action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum HistoryAction {
    #[strum(serialize = "created automatically")]
    Created,
    #[strum(serialize = "assigned")]
    Assigned,
    #[strum(serialize = "accepted")]
    Accepted,
    #[strum(serialize = "refused")]
    Refused,
    #[strum(serialize = "cancelled")]
    Cancelled,
    #[strum(serialize = "concluded")]
    Concluded,
    #[strum(serialize = "outcome registered")]
    OutcomeRegistered,
    #[strum(serialize = "notification sent")]
    NotificationSent,
    #[strum(serialize = "status changed")]
    StatusChanged,
}

impl HistoryAction {
    pub fn for_target(target: OccurrenceStatus) -> Self {
        match target {
            OccurrenceStatus::InProgress => HistoryAction::Assigned,
            OccurrenceStatus::Accepted => HistoryAction::Accepted,
            OccurrenceStatus::Declined => HistoryAction::Refused,
            OccurrenceStatus::Cancelled => HistoryAction::Cancelled,
            OccurrenceStatus::Completed => HistoryAction::Concluded,
            OccurrenceStatus::Pending => HistoryAction::StatusChanged,
        }
    }
}

/// Unmasked record data, stored in `occurrences.full_payload`.
///
/// `Debug` redacts the patient name so the payload can sit inside logged
/// structs without leaking it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct OccurrencePayload {
    pub record_id: Uuid,
    pub patient_name: String,
    pub birth_date: NaiveDate,
    pub age_at_death: i32,
    pub cause_of_death: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed: Option<String>,
    #[serde(default)]
    pub identity_unknown: bool,
    pub hospital_name: String,
}

impl fmt::Debug for OccurrencePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OccurrencePayload")
            .field("record_id", &self.record_id)
            .field("patient_name", &"<redacted>")
            .field("age_at_death", &self.age_at_death)
            .field("sector", &self.sector)
            .field("hospital_name", &self.hospital_name)
            .finish_non_exhaustive()
    }
}

/// Occurrence domain model
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub record_id: Uuid,
    pub status: OccurrenceStatus,
    pub priority_score: i32,
    pub masked_name: String,
    pub full_payload: OccurrencePayload,
    pub death_time: DateTime<Utc>,
    pub window_expires_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        window::time_remaining(self.window_expires_at, now)
    }

    pub fn format_time_remaining(&self, now: DateTime<Utc>) -> String {
        window::format_remaining(self.time_remaining(now))
    }

    pub fn hospital_name(&self) -> &str {
        &self.full_payload.hospital_name
    }

    pub fn sector(&self) -> Option<&str> {
        self.full_payload.sector.as_deref()
    }
}

/// Input produced by the Eligibility Engine for an eligible record
#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub record_id: Uuid,
    pub priority_score: i32,
    pub death_time: DateTime<Utc>,
    pub payload: OccurrencePayload,
}

/// Row handed to the repository, with derived fields filled in
#[derive(Debug, Clone)]
pub struct OccurrenceDraft {
    pub occurrence: NewOccurrence,
    pub masked_name: String,
    pub window_expires_at: DateTime<Utc>,
}

/// List item; never carries the unmasked name
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OccurrenceSummary {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub hospital_name: String,
    pub sector: Option<String>,
    pub status: OccurrenceStatus,
    pub priority_score: i32,
    pub masked_name: String,
    pub death_time: DateTime<Utc>,
    pub window_expires_at: DateTime<Utc>,
    /// `"Xh Ymin"` or `"expired"`
    pub time_remaining: String,
    pub time_remaining_secs: i64,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OccurrenceSummary {
    pub fn from_occurrence(occurrence: &Occurrence, now: DateTime<Utc>) -> Self {
        let remaining = occurrence.time_remaining(now);
        Self {
            id: occurrence.id,
            tenant_id: occurrence.tenant_id,
            hospital_id: occurrence.hospital_id,
            hospital_name: occurrence.full_payload.hospital_name.clone(),
            sector: occurrence.full_payload.sector.clone(),
            status: occurrence.status,
            priority_score: occurrence.priority_score,
            masked_name: occurrence.masked_name.clone(),
            death_time: occurrence.death_time,
            window_expires_at: occurrence.window_expires_at,
            time_remaining: window::format_remaining(remaining),
            time_remaining_secs: remaining.num_seconds(),
            notified_at: occurrence.notified_at,
            created_at: occurrence.created_at,
            updated_at: occurrence.updated_at,
        }
    }
}

/// Single-item view; `full_payload` only for callers allowed to operate
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OccurrenceDetail {
    #[serde(flatten)]
    pub summary: OccurrenceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_payload: Option<OccurrencePayload>,
}

/// One row of the append-only ledger
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: Option<OccurrenceStatus>,
    pub notes: Option<String>,
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub occurrence_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: HistoryAction,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: Option<OccurrenceStatus>,
    pub notes: Option<String>,
    pub outcome: Option<Outcome>,
}

/// Guarded status update plus its ledger row
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub occurrence_id: Uuid,
    pub tenant_id: Uuid,
    pub from: OccurrenceStatus,
    pub to: OccurrenceStatus,
    pub actor: Option<Uuid>,
    pub notes: Option<String>,
    pub outcome: Option<Outcome>,
}

impl StatusChange {
    pub fn history_entry(&self) -> NewHistoryEntry {
        NewHistoryEntry {
            occurrence_id: self.occurrence_id,
            tenant_id: self.tenant_id,
            user_id: self.actor,
            action: HistoryAction::for_target(self.to),
            previous_status: Some(self.from),
            new_status: Some(self.to),
            notes: self.notes.clone(),
            outcome: self.outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceSort {
    /// Highest priority first, oldest first on ties
    #[default]
    PriorityScore,
    /// Newest first
    CreatedAt,
    /// Earliest death first, i.e. closest to window expiry
    DeathTime,
}

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Query string accepted by `GET /occurrences`
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OccurrenceFilter {
    pub status: Option<OccurrenceStatus>,
    pub hospital_id: Option<Uuid>,
    /// RFC3339 timestamp or `YYYY-MM-DD`, inclusive
    pub date_from: Option<String>,
    /// RFC3339 timestamp or `YYYY-MM-DD` (whole day), inclusive
    pub date_to: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub sort: Option<OccurrenceSort>,
}

/// Validated form of [`OccurrenceFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<OccurrenceStatus>,
    pub hospital_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub created_before: Option<DateTime<Utc>>,
    /// 1-based
    pub page: u64,
    pub page_size: u64,
    pub sort: OccurrenceSort,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            hospital_id: None,
            created_from: None,
            created_before: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: OccurrenceSort::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Paginated<T: ToSchema> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T: ToSchema> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, page_size: u64) -> Self {
        Self {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TransitionRequest {
    pub status: OccurrenceStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OutcomeRequest {
    pub outcome: Outcome,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Dashboard counters derived from the occurrence table
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct OccurrenceMetrics {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub notified: u64,
    /// Mean of `notified_at - created_at` over notified occurrences
    pub avg_time_to_notification_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_transition_table_matches_lifecycle() {
        use OccurrenceStatus::*;
        let edges = [
            (Pending, InProgress),
            (Pending, Cancelled),
            (InProgress, Accepted),
            (InProgress, Declined),
            (InProgress, Cancelled),
            (Accepted, Completed),
            (Accepted, Cancelled),
        ];
        for from in OccurrenceStatus::iter() {
            for to in OccurrenceStatus::iter() {
                assert_eq!(
                    from.can_transition_to(to),
                    edges.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_cancel_reachable_from_every_non_terminal_state() {
        for status in OccurrenceStatus::iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(OccurrenceStatus::Cancelled), "{status}");
        }
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = OccurrenceStatus::iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                OccurrenceStatus::Declined,
                OccurrenceStatus::Completed,
                OccurrenceStatus::Cancelled
            ]
        );
    }

    #[test]
    fn test_completed_only_reachable_from_accepted() {
        let sources: Vec<_> = OccurrenceStatus::iter()
            .filter(|s| s.can_transition_to(OccurrenceStatus::Completed))
            .collect();
        assert_eq!(sources, vec![OccurrenceStatus::Accepted]);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(OccurrenceStatus::InProgress.to_string(), "em_andamento");
        assert_eq!(
            serde_json::to_value(OccurrenceStatus::Declined).unwrap(),
            serde_json::json!("recusada")
        );
        let parsed: OccurrenceStatus = serde_json::from_str("\"concluida\"").unwrap();
        assert_eq!(parsed, OccurrenceStatus::Completed);
    }

    #[test]
    fn test_outcome_accepts_short_success_alias() {
        let parsed: Outcome = serde_json::from_str("\"sucesso\"").unwrap();
        assert_eq!(parsed, Outcome::CaptureSuccess);
        assert_eq!(Outcome::from_str("sucesso").unwrap(), Outcome::CaptureSuccess);
        assert_eq!(Outcome::CaptureSuccess.to_string(), "sucesso_captacao");
        assert_eq!(
            serde_json::to_value(Outcome::CaptureSuccess).unwrap(),
            serde_json::json!("sucesso_captacao")
        );
    }

    #[test]
    fn test_parsing_accepts_every_stored_value() {
        for status in OccurrenceStatus::iter() {
            assert_eq!(OccurrenceStatus::from_str(&status.to_string()).unwrap(), status);
        }
        for outcome in Outcome::iter() {
            assert_eq!(Outcome::from_str(&outcome.to_string()).unwrap(), outcome);
        }
        assert!(OccurrenceStatus::from_str("pending").is_err());
        assert!(Outcome::from_str("sucesso_parcial").is_err());
    }

    #[test]
    fn test_history_labels() {
        assert_eq!(HistoryAction::Created.to_string(), "created automatically");
        assert_eq!(
            HistoryAction::for_target(OccurrenceStatus::InProgress).to_string(),
            "assigned"
        );
        assert_eq!(
            HistoryAction::for_target(OccurrenceStatus::Declined).to_string(),
            "refused"
        );
        assert_eq!(
            HistoryAction::for_target(OccurrenceStatus::Completed).to_string(),
            "concluded"
        );
        assert_eq!(
            HistoryAction::for_target(OccurrenceStatus::Pending).to_string(),
            "status changed"
        );
    }

    #[test]
    fn test_payload_debug_redacts_name() {
        let payload = OccurrencePayload {
            record_id: Uuid::nil(),
            patient_name: "Maria Aparecida".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
            age_at_death: 66,
            cause_of_death: "Stroke".to_string(),
            medical_record: None,
            sector: Some("UTI".to_string()),
            bed: None,
            identity_unknown: false,
            hospital_name: "Hospital Central".to_string(),
        };
        let debug = format!("{payload:?}");
        assert!(!debug.contains("Maria"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_paginated_total_pages() {
        let page: Paginated<HistoryEntry> = Paginated::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: Paginated<HistoryEntry> = Paginated::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }
}
