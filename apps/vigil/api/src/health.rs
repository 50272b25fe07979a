//! Liveness and readiness with real Postgres/Redis checks.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use database::{postgres::DatabaseConnection, redis::ConnectionManager};
use serde_json::{Value, json};

#[derive(Clone)]
pub struct ReadyState {
    pub db: DatabaseConnection,
    pub redis: ConnectionManager,
}

/// `/health` always answers; `/ready` answers 503 while a dependency is down.
pub fn health_router(state: ReadyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready(State(state): State<ReadyState>) -> Response {
    let (postgres, redis) = tokio::join!(
        database::postgres::check_health(&state.db),
        database::redis::check_health(&state.redis),
    );
    readiness_response([
        ("postgres", postgres.map_err(|e| e.to_string())),
        ("redis", redis.map_err(|e| e.to_string())),
    ])
}

fn readiness_response<const N: usize>(results: [(&str, Result<(), String>); N]) -> Response {
    let ready = results.iter().all(|(_, r)| r.is_ok());
    let checks: serde_json::Map<String, Value> = results
        .into_iter()
        .map(|(name, result)| {
            let value = match result {
                Ok(()) => json!({ "status": "up" }),
                Err(e) => {
                    tracing::warn!(check = name, error = %e, "Readiness check failed");
                    json!({ "status": "down", "error": e })
                }
            };
            (name.to_string(), value)
        })
        .collect();

    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "checks": checks,
    });
    (status, Json(body)).into_response()
}
