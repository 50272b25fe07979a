use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(axum_helpers::ErrorResponse)
    ),
    info(
        title = "Vigil API",
        version = "0.1.0",
        description = "Death-record triage: occurrences, triage rules and the live feed"
    ),
    servers(
        (url = "/api/v1", description = "API base path")
    ),
    nest(
        (path = "/occurrences", api = domain_occurrences::ApiDoc),
        (path = "/triage-rules", api = domain_triage::ApiDoc),
        (path = "/live", api = notification_dispatch::live::sse::ApiDoc)
    )
)]
pub struct ApiDoc;
