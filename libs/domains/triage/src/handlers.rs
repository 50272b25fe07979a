use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use axum_helpers::{ErrorResponse, ValidatedJson};
use core_tenancy::{Capability, Principal, TenantScope};
use std::sync::Arc;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::{TriageError, TriageResult};
use crate::models::{CreateRule, RuleDefinition, UpdateRule};
use crate::service::TriageRuleService;

/// OpenAPI documentation for the triage rules API
#[derive(OpenApi)]
#[openapi(
    paths(list_rules, get_rule, create_rule, update_rule, deactivate_rule),
    components(schemas(RuleDefinition, CreateRule, UpdateRule)),
    tags(
        (name = "triage-rules", description = "Per-tenant eligibility rules")
    )
)]
pub struct ApiDoc;

/// Rule routes; every route requires `manage_triage_rules`
pub fn router(service: TriageRuleService) -> Router {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route(
            "/{id}",
            get(get_rule).patch(update_rule).delete(deactivate_rule),
        )
        .with_state(Arc::new(service))
}

fn parse_id(id: &str) -> TriageResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| TriageError::Validation("Invalid rule ID".to_string()))
}

fn authorize(principal: &Principal) -> TriageResult<TenantScope> {
    principal.require(Capability::ManageTriageRules)?;
    Ok(TenantScope::resolve(Some(principal)))
}

/// List the tenant's rules, active first
#[utoipa::path(
    get,
    path = "",
    tag = "triage-rules",
    responses(
        (status = 200, description = "Rules", body = Vec<RuleDefinition>),
        (status = 403, description = "Missing capability", body = ErrorResponse)
    )
)]
pub async fn list_rules(
    State(service): State<Arc<TriageRuleService>>,
    principal: Principal,
) -> TriageResult<Json<Vec<RuleDefinition>>> {
    let scope = authorize(&principal)?;
    Ok(Json(service.list(scope).await?))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "triage-rules",
    params(("id" = String, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule found", body = RuleDefinition),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    )
)]
pub async fn get_rule(
    State(service): State<Arc<TriageRuleService>>,
    principal: Principal,
    Path(id): Path<String>,
) -> TriageResult<Json<RuleDefinition>> {
    let scope = authorize(&principal)?;
    let id = parse_id(&id)?;
    Ok(Json(service.get(scope, id).await?))
}

/// Create a rule from a `{tipo, valor, acao}` document
#[utoipa::path(
    post,
    path = "",
    tag = "triage-rules",
    request_body = CreateRule,
    responses(
        (status = 201, description = "Rule created", body = RuleDefinition),
        (status = 400, description = "Invalid rule definition", body = ErrorResponse),
        (status = 403, description = "Missing capability", body = ErrorResponse)
    )
)]
pub async fn create_rule(
    State(service): State<Arc<TriageRuleService>>,
    principal: Principal,
    ValidatedJson(input): ValidatedJson<CreateRule>,
) -> TriageResult<impl IntoResponse> {
    let scope = authorize(&principal)?;
    let rule = service.create(scope, input).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tag = "triage-rules",
    params(("id" = String, Path, description = "Rule ID")),
    request_body = UpdateRule,
    responses(
        (status = 200, description = "Rule updated", body = RuleDefinition),
        (status = 400, description = "Invalid rule definition", body = ErrorResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    )
)]
pub async fn update_rule(
    State(service): State<Arc<TriageRuleService>>,
    principal: Principal,
    Path(id): Path<String>,
    ValidatedJson(input): ValidatedJson<UpdateRule>,
) -> TriageResult<Json<RuleDefinition>> {
    let scope = authorize(&principal)?;
    let id = parse_id(&id)?;
    Ok(Json(service.update(scope, id, input).await?))
}

/// Switch a rule off; rules are kept for audit
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "triage-rules",
    params(("id" = String, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule deactivated", body = RuleDefinition),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    )
)]
pub async fn deactivate_rule(
    State(service): State<Arc<TriageRuleService>>,
    principal: Principal,
    Path(id): Path<String>,
) -> TriageResult<Json<RuleDefinition>> {
    let scope = authorize(&principal)?;
    let id = parse_id(&id)?;
    Ok(Json(service.deactivate(scope, id).await?))
}
