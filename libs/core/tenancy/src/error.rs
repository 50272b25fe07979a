use axum::response::{IntoResponse, Response};
use axum_helpers::AppError;
use thiserror::Error;

use crate::Capability;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenancyError {
    #[error("tenant ID is required")]
    TenantRequired,

    #[error("authentication required")]
    Unauthenticated,

    #[error("missing capability: {0}")]
    MissingCapability(Capability),

    #[error("tenant context switching requires super admin")]
    ContextSwitchForbidden,

    #[error("invalid tenant context: {0}")]
    InvalidTenantContext(String),

    #[error("invalid principal header {header}: {reason}")]
    InvalidHeader { header: &'static str, reason: String },
}

pub type TenancyResult<T> = Result<T, TenancyError>;

impl From<TenancyError> for AppError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::Unauthenticated => AppError::Unauthorized(err.to_string()),
            TenancyError::MissingCapability(_) | TenancyError::ContextSwitchForbidden => {
                AppError::Forbidden(err.to_string())
            }
            TenancyError::TenantRequired
            | TenancyError::InvalidTenantContext(_)
            | TenancyError::InvalidHeader { .. } => AppError::bad_request(err.to_string()),
        }
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}
