mod occurrences;

pub use occurrences::*;

use axum::{
    Router,
    routing::{get, patch, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::models::{
    HistoryEntry, OccurrenceDetail, OccurrenceMetrics, OccurrencePayload, OccurrenceSort,
    OccurrenceStatus, OccurrenceSummary, Outcome, OutcomeRequest, TransitionRequest,
};
use crate::repository::OccurrenceRepository;
use crate::service::OccurrenceService;

/// OpenAPI documentation for the occurrences API
#[derive(OpenApi)]
#[openapi(
    paths(
        occurrences::list_occurrences,
        occurrences::get_occurrence,
        occurrences::get_history,
        occurrences::update_status,
        occurrences::register_outcome,
        occurrences::get_metrics,
    ),
    components(
        schemas(
            OccurrenceSummary,
            OccurrenceDetail,
            OccurrencePayload,
            OccurrenceStatus,
            OccurrenceSort,
            Outcome,
            HistoryEntry,
            TransitionRequest,
            OutcomeRequest,
            OccurrenceMetrics,
        )
    ),
    tags(
        (name = "occurrences", description = "Occurrence lifecycle and history")
    )
)]
pub struct ApiDoc;

/// Occurrence routes; expects a `Principal` extension from the auth layer
pub fn router<R: OccurrenceRepository + 'static>(service: OccurrenceService<R>) -> Router {
    let shared_service = Arc::new(service);

    Router::new()
        .route("/", get(occurrences::list_occurrences))
        .route("/metrics", get(occurrences::get_metrics))
        .route("/{id}", get(occurrences::get_occurrence))
        .route("/{id}/history", get(occurrences::get_history))
        .route("/{id}/status", patch(occurrences::update_status))
        .route("/{id}/outcome", post(occurrences::register_outcome))
        .with_state(shared_service)
}
