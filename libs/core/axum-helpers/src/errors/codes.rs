//! Stable error identifiers returned in every error body.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Client errors are 1xxx, server errors 5xxx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidTransition,
    OutcomeRequired,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    JsonExtraction,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::OutcomeRequired => "OUTCOME_REQUIRED",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::JsonExtraction => "JSON_EXTRACTION",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::ValidationError => 1001,
            Self::InvalidTransition => 1002,
            Self::OutcomeRequired => 1003,
            Self::NotFound => 1004,
            Self::Unauthorized => 1005,
            Self::Forbidden => 1006,
            Self::Conflict => 1007,
            Self::JsonExtraction => 1008,
            Self::InternalError => 5001,
            Self::ServiceUnavailable => 5002,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
