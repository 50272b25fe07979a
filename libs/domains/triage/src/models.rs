use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use domain_occurrences::OccurrencePayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Candidate death record from the hospital feed
#[derive(Clone, PartialEq)]
pub struct EligibleRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub patient_name: String,
    pub birth_date: NaiveDate,
    pub death_time: DateTime<Utc>,
    pub cause_of_death: String,
    pub medical_record: Option<String>,
    pub sector: Option<String>,
    pub bed: Option<String>,
    pub identity_unknown: bool,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for EligibleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibleRecord")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("hospital_id", &self.hospital_id)
            .field("patient_name", &"<redacted>")
            .field("death_time", &self.death_time)
            .field("sector", &self.sector)
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

impl EligibleRecord {
    /// Whole years at the date of death; one less if that year's birthday
    /// had not happened yet.
    pub fn age_at_death(&self) -> i32 {
        let death = self.death_time.date_naive();
        let mut years = death.year() - self.birth_date.year();
        if (death.month(), death.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        years
    }

    pub fn elapsed_since_death(&self, now: DateTime<Utc>) -> Duration {
        now - self.death_time
    }

    /// Unmasked occurrence payload for this record
    pub fn to_payload(&self, hospital_name: &str) -> OccurrencePayload {
        OccurrencePayload {
            record_id: self.id,
            patient_name: self.patient_name.clone(),
            birth_date: self.birth_date,
            age_at_death: self.age_at_death(),
            cause_of_death: self.cause_of_death.clone(),
            medical_record: self.medical_record.clone(),
            sector: self.sector.clone(),
            bed: self.bed.clone(),
            identity_unknown: self.identity_unknown,
            hospital_name: hospital_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hospital {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub code: String,
}

/// Stored triage rule as configured through the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RuleDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// `{"tipo": ..., "valor": ..., "acao": ...}`
    #[schema(value_type = Object)]
    pub definition: serde_json::Value,
    pub active: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRule {
    #[validate(length(min = 2, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub definition: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRule {
    #[validate(length(min = 2, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub definition: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

/// Result of running the rule set over one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub eligible: bool,
    /// Zero for rejected records
    pub score: i32,
    pub reasons: Vec<String>,
    /// Matches of rules whose action is `alertar`; logged, never rejecting
    pub alerts: Vec<String>,
    pub rules_applied: Vec<String>,
}
