use axum::response::{IntoResponse, Response};
use axum_helpers::{AppError, ErrorCode};
use core_tenancy::TenancyError;
use domain_occurrences::OccurrenceError;
use serde_json::json;
use stream_worker::StreamError;
use thiserror::Error;
use uuid::Uuid;

use crate::rules::RuleParseError;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Triage rule {0} not found")]
    RuleNotFound(Uuid),

    #[error("Eligible record {0} not found")]
    RecordNotFound(Uuid),

    #[error("Hospital {0} not found")]
    HospitalNotFound(Uuid),

    #[error("Tenant mismatch for record {record_id}: event carries {event_tenant}, store has {stored_tenant}")]
    TenantMismatch {
        record_id: Uuid,
        event_tenant: Uuid,
        stored_tenant: Uuid,
    },

    #[error("Invalid rule definition: {0}")]
    RuleParse(#[from] RuleParseError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error(transparent)]
    Occurrence(#[from] OccurrenceError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub type TriageResult<T> = Result<T, TriageError>;

impl From<TriageError> for AppError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::RuleNotFound(_)
            | TriageError::RecordNotFound(_)
            | TriageError::HospitalNotFound(_) => AppError::NotFound(err.to_string()),
            TriageError::RuleParse(ref e) => AppError::BadRequest {
                code: ErrorCode::ValidationError,
                details: Some(json!({ "definition": e.to_string() })),
                message: err.to_string(),
            },
            TriageError::Validation(msg) => AppError::bad_request(msg),
            TriageError::Tenancy(e) => e.into(),
            TriageError::Occurrence(e) => e.into(),
            TriageError::Stream(e) => AppError::ServiceUnavailable(e.to_string()),
            TriageError::Redis(e) => AppError::ServiceUnavailable(format!("Redis error: {}", e)),
            TriageError::TenantMismatch { .. } => AppError::InternalServerError(err.to_string()),
            TriageError::Database(e) => {
                AppError::InternalServerError(format!("Database error: {}", e))
            }
        }
    }
}

impl IntoResponse for TriageError {
    fn into_response(self) -> Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}
