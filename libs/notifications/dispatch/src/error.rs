use axum::response::{IntoResponse, Response};
use axum_helpers::AppError;
use core_tenancy::TenancyError;
use domain_occurrences::OccurrenceError;
use stream_worker::StreamError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Neither the live push nor any queued delivery went out
    #[error("Nothing was handed off for occurrence {0}")]
    NothingHandedOff(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

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

pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Tenancy(e) => e.into(),
            DispatchError::Occurrence(e) => e.into(),
            DispatchError::Stream(_) | DispatchError::Redis(_) | DispatchError::NothingHandedOff(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            DispatchError::Serialization(_) | DispatchError::Database(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}
