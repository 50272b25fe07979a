use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_helpers::{ErrorResponse, ValidatedJson};
use chrono::Utc;
use core_tenancy::{Capability, Principal, TenantScope};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{OccurrenceError, OccurrenceResult};
use crate::models::{
    HistoryEntry, OccurrenceDetail, OccurrenceFilter, OccurrenceMetrics, OccurrenceSummary,
    OutcomeRequest, Paginated, TransitionRequest,
};
use crate::repository::OccurrenceRepository;
use crate::service::OccurrenceService;

fn parse_id(id: &str) -> OccurrenceResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| OccurrenceError::Validation("Invalid occurrence ID".to_string()))
}

/// List occurrences visible to the caller, masked
#[utoipa::path(
    get,
    path = "",
    tag = "occurrences",
    params(OccurrenceFilter),
    responses(
        (status = 200, description = "Page of occurrences", body = Paginated<OccurrenceSummary>),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    )
)]
pub async fn list_occurrences<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
    Query(filter): Query<OccurrenceFilter>,
) -> OccurrenceResult<Json<Paginated<OccurrenceSummary>>> {
    let scope = TenantScope::resolve(Some(&principal));
    let page = service.list(scope, filter).await?;
    Ok(Json(page))
}

/// Get one occurrence; the full payload requires `operate_occurrences`
#[utoipa::path(
    get,
    path = "/{id}",
    tag = "occurrences",
    params(
        ("id" = String, Path, description = "Occurrence ID")
    ),
    responses(
        (status = 200, description = "Occurrence found", body = OccurrenceDetail),
        (status = 400, description = "Invalid occurrence ID", body = ErrorResponse),
        (status = 404, description = "Occurrence not found", body = ErrorResponse)
    )
)]
pub async fn get_occurrence<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
    Path(id): Path<String>,
) -> OccurrenceResult<Json<OccurrenceDetail>> {
    let id = parse_id(&id)?;
    let scope = TenantScope::resolve(Some(&principal));
    let detail = service.get_detail(scope, id, &principal).await?;
    Ok(Json(detail))
}

/// History ledger, oldest first
#[utoipa::path(
    get,
    path = "/{id}/history",
    tag = "occurrences",
    params(
        ("id" = String, Path, description = "Occurrence ID")
    ),
    responses(
        (status = 200, description = "History rows", body = Vec<HistoryEntry>),
        (status = 404, description = "Occurrence not found", body = ErrorResponse)
    )
)]
pub async fn get_history<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
    Path(id): Path<String>,
) -> OccurrenceResult<Json<Vec<HistoryEntry>>> {
    let id = parse_id(&id)?;
    let scope = TenantScope::resolve(Some(&principal));
    Ok(Json(service.history(scope, id).await?))
}

/// Move an occurrence to a new status
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tag = "occurrences",
    params(
        ("id" = String, Path, description = "Occurrence ID")
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Status changed", body = OccurrenceSummary),
        (status = 400, description = "Illegal transition or outcome missing", body = ErrorResponse),
        (status = 403, description = "Missing capability", body = ErrorResponse),
        (status = 404, description = "Occurrence not found", body = ErrorResponse),
        (status = 409, description = "Concurrent modification", body = ErrorResponse)
    )
)]
pub async fn update_status<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
    Path(id): Path<String>,
    ValidatedJson(input): ValidatedJson<TransitionRequest>,
) -> OccurrenceResult<impl IntoResponse> {
    principal.require(Capability::OperateOccurrences)?;
    let id = parse_id(&id)?;
    let scope = TenantScope::resolve(Some(&principal));

    let occurrence = service
        .transition(scope, id, input.status, Some(principal.user_id), input.notes)
        .await?;
    Ok(Json(OccurrenceSummary::from_occurrence(&occurrence, Utc::now())))
}

/// Register the outcome required before completion
#[utoipa::path(
    post,
    path = "/{id}/outcome",
    tag = "occurrences",
    params(
        ("id" = String, Path, description = "Occurrence ID")
    ),
    request_body = OutcomeRequest,
    responses(
        (status = 201, description = "Outcome registered", body = HistoryEntry),
        (status = 400, description = "Outcome not allowed in the current status", body = ErrorResponse),
        (status = 403, description = "Missing capability", body = ErrorResponse),
        (status = 404, description = "Occurrence not found", body = ErrorResponse),
        (status = 409, description = "Outcome already registered", body = ErrorResponse)
    )
)]
pub async fn register_outcome<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
    Path(id): Path<String>,
    ValidatedJson(input): ValidatedJson<OutcomeRequest>,
) -> OccurrenceResult<impl IntoResponse> {
    principal.require(Capability::OperateOccurrences)?;
    let id = parse_id(&id)?;
    let scope = TenantScope::resolve(Some(&principal));

    let entry = service
        .register_outcome(scope, id, input.outcome, input.notes, Some(principal.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Dashboard counters for the caller's tenant
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "occurrences",
    responses(
        (status = 200, description = "Occurrence metrics", body = OccurrenceMetrics),
        (status = 403, description = "Missing capability", body = ErrorResponse)
    )
)]
pub async fn get_metrics<R: OccurrenceRepository>(
    State(service): State<Arc<OccurrenceService<R>>>,
    principal: Principal,
) -> OccurrenceResult<Json<OccurrenceMetrics>> {
    principal.require(Capability::ViewMetrics)?;
    let scope = TenantScope::resolve(Some(&principal));
    Ok(Json(service.metrics(scope).await?))
}
