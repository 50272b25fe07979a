use axum::response::{IntoResponse, Response};
use axum_helpers::{AppError, ErrorCode};
use core_tenancy::TenancyError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::OccurrenceStatus;

#[derive(Debug, Error)]
pub enum OccurrenceError {
    #[error("Occurrence {0} not found")]
    NotFound(Uuid),

    #[error("Invalid transition from {current} to {target}")]
    InvalidTransition {
        current: OccurrenceStatus,
        target: OccurrenceStatus,
        allowed: Vec<OccurrenceStatus>,
    },

    #[error("Outcome required before completing the occurrence")]
    OutcomeRequired,

    #[error("Outcome cannot be registered while the occurrence is {0}")]
    OutcomeNotAllowed(OccurrenceStatus),

    #[error("Outcome already registered")]
    OutcomeAlreadyRegistered,

    #[error("Occurrence {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("An occurrence already exists for record {0}")]
    DuplicateRecord(Uuid),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub type OccurrenceResult<T> = Result<T, OccurrenceError>;

impl From<OccurrenceError> for AppError {
    fn from(err: OccurrenceError) -> Self {
        match err {
            OccurrenceError::NotFound(_) => AppError::NotFound(err.to_string()),
            OccurrenceError::InvalidTransition {
                current,
                target,
                ref allowed,
            } => AppError::BadRequest {
                code: ErrorCode::InvalidTransition,
                details: Some(json!({
                    "error": "invalid_transition",
                    "current_status": current,
                    "target_status": target,
                    "allowed": allowed,
                })),
                message: err.to_string(),
            },
            OccurrenceError::OutcomeRequired => AppError::BadRequest {
                code: ErrorCode::OutcomeRequired,
                message: err.to_string(),
                details: None,
            },
            OccurrenceError::OutcomeNotAllowed(current) => AppError::BadRequest {
                code: ErrorCode::InvalidTransition,
                details: Some(json!({ "current_status": current })),
                message: err.to_string(),
            },
            OccurrenceError::OutcomeAlreadyRegistered
            | OccurrenceError::Conflict(_)
            | OccurrenceError::DuplicateRecord(_) => AppError::Conflict(err.to_string()),
            OccurrenceError::Tenancy(e) => e.into(),
            OccurrenceError::Validation(msg) => AppError::bad_request(msg),
            OccurrenceError::Database(e) => {
                AppError::InternalServerError(format!("Database error: {}", e))
            }
        }
    }
}

impl IntoResponse for OccurrenceError {
    fn into_response(self) -> Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_invalid_transition_is_bad_request() {
        let err = OccurrenceError::InvalidTransition {
            current: OccurrenceStatus::Pending,
            target: OccurrenceStatus::Completed,
            allowed: OccurrenceStatus::Pending.allowed_transitions().to_vec(),
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (OccurrenceError::NotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (OccurrenceError::OutcomeRequired, StatusCode::BAD_REQUEST),
            (OccurrenceError::OutcomeAlreadyRegistered, StatusCode::CONFLICT),
            (OccurrenceError::Conflict(Uuid::nil()), StatusCode::CONFLICT),
            (
                OccurrenceError::Tenancy(TenancyError::Unauthenticated),
                StatusCode::UNAUTHORIZED,
            ),
            (
                OccurrenceError::Database(sea_orm::DbErr::Custom("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
