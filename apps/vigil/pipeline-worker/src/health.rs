//! Extra health surface for the worker: Postgres readiness and pipeline counters.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, Router, extract::State, routing::get};
use database::postgres::DatabaseConnection;
use domain_triage::{Poller, PollerStatus, TriageError, TriageProcessor, TriageStats};
use serde::Serialize;
use stream_worker::ReadinessCheck;

/// `/ready` fails while Postgres does not answer `SELECT 1`
pub struct PostgresCheck {
    db: DatabaseConnection,
}

impl PostgresCheck {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReadinessCheck for PostgresCheck {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Result<(), String> {
        database::postgres::check_health(&self.db)
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub poller: PollerStatus,
    pub triage: TriageStats,
}

#[derive(Clone)]
pub struct PipelineState {
    pub poller: Arc<Poller>,
    pub triage: Arc<TriageProcessor>,
}

/// `GET /pipeline/status`
pub fn pipeline_router(state: PipelineState) -> Router {
    Router::new()
        .route("/pipeline/status", get(pipeline_status))
        .with_state(state)
}

async fn pipeline_status(State(state): State<PipelineState>) -> Result<Json<PipelineStatus>, TriageError> {
    Ok(Json(PipelineStatus {
        poller: state.poller.status().await?,
        triage: state.triage.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase};

    #[tokio::test]
    async fn test_postgres_check_reports_failure() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("connection refused".into())])
            .into_connection();
        let err = PostgresCheck::new(db).check().await.unwrap_err();
        assert!(err.contains("connection refused"), "{err}");
    }
}
