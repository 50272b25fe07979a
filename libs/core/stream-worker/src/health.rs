//! Health, readiness, metrics and DLQ admin endpoints for worker processes.
//!
//! - `GET /health` liveness
//! - `GET /ready` Redis PING plus every registered [`ReadinessCheck`]
//! - `GET /metrics` Prometheus text format
//! - `GET /stream/info` length and pending count per consumed stream
//! - `GET /admin/dlq/{dlq}` dead-lettered entries
//! - `POST /admin/dlq/{dlq}/{dlq_id}/replay` move an entry back to its stream

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use redis::aio::ConnectionManager;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::consumer::StreamConsumer;
use crate::dlq::DlqManager;
use crate::metrics;

/// A dependency that must be reachable before the process reports ready.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> Result<(), String>;
}

#[derive(Clone)]
pub struct HealthState {
    redis: ConnectionManager,
    app_name: String,
    app_version: String,
    consumers: Vec<StreamConsumer>,
    /// DLQ stream name -> (manager, stream replayed entries go back to)
    dlqs: BTreeMap<String, (DlqManager, String)>,
    checks: Vec<Arc<dyn ReadinessCheck>>,
}

impl HealthState {
    pub fn new(
        redis: ConnectionManager,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            app_name: app_name.into(),
            app_version: app_version.into(),
            consumers: Vec::new(),
            dlqs: BTreeMap::new(),
            checks: Vec::new(),
        }
    }

    /// Report on a consumed stream and expose its DLQ.
    pub fn with_consumer(mut self, consumer: StreamConsumer) -> Self {
        let config = consumer.config();
        let dlq = DlqManager::new(self.redis.clone(), config.dlq_stream.clone());
        self.dlqs.insert(
            config.dlq_stream.clone(),
            (dlq, config.stream_name.clone()),
        );
        self.consumers.push(consumer);
        self
    }

    pub fn with_check(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.checks.push(check);
        self
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/admin/dlq/{dlq}", get(dlq_list_handler))
        .route("/admin/dlq/{dlq}/{dlq_id}/replay", post(dlq_replay_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "name": state.app_name,
        "version": state.app_version,
    }))
}

async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let mut checks = serde_json::Map::new();
    let mut ready = true;

    let mut conn = state.redis.clone();
    let ping: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    match ping {
        Ok(reply) if reply == "PONG" => {
            checks.insert("redis".into(), json!("ok"));
        }
        Ok(reply) => {
            ready = false;
            checks.insert("redis".into(), json!(format!("unexpected response: {reply}")));
        }
        Err(e) => {
            ready = false;
            checks.insert("redis".into(), json!(format!("error: {e}")));
        }
    }

    for check in &state.checks {
        match check.check().await {
            Ok(()) => {
                checks.insert(check.name().into(), json!("ok"));
            }
            Err(e) => {
                ready = false;
                checks.insert(check.name().into(), json!(format!("error: {e}")));
            }
        }
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics not initialized".to_string(),
        ),
    }
}

async fn stream_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut streams = Vec::with_capacity(state.consumers.len());

    for consumer in &state.consumers {
        let info = consumer.stream_info().await.map_err(internal)?;
        let dlq_length = match state.dlqs.get(&consumer.config().dlq_stream) {
            Some((dlq, _)) => dlq.count().await.map_err(internal)?,
            None => 0,
        };
        streams.push(json!({
            "stream": info.stream_name,
            "group": info.consumer_group,
            "length": info.length,
            "pending": info.pending_count,
            "dlq_length": dlq_length,
        }));
    }

    Ok(Json(json!({ "streams": streams })))
}

#[derive(Debug, Deserialize)]
struct DlqListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    after: Option<String>,
}

fn default_limit() -> usize {
    20
}

async fn dlq_list_handler(
    State(state): State<HealthState>,
    Path(dlq): Path<String>,
    Query(params): Query<DlqListParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (manager, _) = state.dlqs.get(&dlq).ok_or_else(|| not_found(&dlq))?;
    let limit = params.limit.min(100);

    let entries = manager
        .list(limit, params.after.as_deref())
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "dlq": dlq,
        "count": entries.len(),
        "entries": entries,
    })))
}

async fn dlq_replay_handler(
    State(state): State<HealthState>,
    Path((dlq, dlq_id)): Path<(String, String)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (manager, target) = state.dlqs.get(&dlq).ok_or_else(|| not_found(&dlq))?;

    match manager.replay(&dlq_id, target).await.map_err(internal)? {
        Some(new_id) => Ok(Json(json!({ "replayed": dlq_id, "stream_id": new_id }))),
        None => Err(not_found(&dlq_id)),
    }
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

fn not_found(what: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use test_utils::TestRedis;
    use tower::ServiceExt;

    struct FailingCheck;

    #[async_trait]
    impl ReadinessCheck for FailingCheck {
        fn name(&self) -> &'static str {
            "postgres"
        }

        async fn check(&self) -> Result<(), String> {
            Err("connection refused".into())
        }
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_ready_reports_failing_dependency() {
        let redis = TestRedis::new().await;
        let state = HealthState::new(redis.connection(), "vigil-test", "0.0.0")
            .with_check(Arc::new(FailingCheck));

        let response = health_router(state)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["checks"]["redis"], "ok");
        assert_eq!(json["checks"]["postgres"], "error: connection refused");
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_unknown_dlq_is_not_found() {
        let redis = TestRedis::new().await;
        let state = HealthState::new(redis.connection(), "vigil-test", "0.0.0");

        let response = health_router(state)
            .oneshot(Request::get("/admin/dlq/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
