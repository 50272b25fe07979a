//! Vigil API
//!
//! ```text
//! gateway ──► gateway_principal ──► /api/v1/occurrences   OccurrenceService ──► LiveStatusListener ──► PUBLISH
//!                                   /api/v1/triage-rules  TriageRuleService ──► invalidation PUBLISH
//!                                   /api/v1/live          LiveFeed ◄── SUBSCRIBE vigil:live_events
//! ```
//!
//! Identity comes from the gateway headers; every handler resolves its tenant
//! scope from the `Principal` the middleware attaches.

pub mod config;
pub mod health;
pub mod openapi;

use std::sync::Arc;

use axum::Router;
use axum_helpers::{create_app, create_router, shutdown_signal};
use core_config::tracing::{init_tracing, install_color_eyre};
use database::common::RetryConfig;
use domain_occurrences::{OccurrenceRepository, OccurrenceService, PgOccurrenceRepository};
use domain_triage::{PgTriageRuleRepository, RedisInvalidationPublisher, TriageRuleService};
use eyre::{Result, WrapErr};
use migration::Migrator;
use notification_dispatch::{LiveFeed, LiveHub, LiveStatusListener, live_router};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::health::{ReadyState, health_router};

/// Services behind the versioned API routes
pub struct ApiServices<R: OccurrenceRepository + 'static> {
    pub occurrences: OccurrenceService<R>,
    pub rules: TriageRuleService,
    pub feed: LiveFeed,
}

/// `/api/v1/...` routes, with the gateway identity middleware applied
pub fn routes<R: OccurrenceRepository + 'static>(services: ApiServices<R>) -> Router {
    Router::new()
        .nest(
            "/api/v1/occurrences",
            domain_occurrences::handlers::router(services.occurrences),
        )
        .nest(
            "/api/v1/triage-rules",
            domain_triage::handlers::router(services.rules),
        )
        .nest("/api/v1/live", live_router(services.feed))
        .layer(axum::middleware::from_fn(core_tenancy::gateway_principal))
}

/// Run the API until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error on invalid configuration, when Postgres or Redis stay
/// unreachable through the startup retries, when migrations fail, or when
/// the listener cannot bind.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let config = Config::from_env()?;
    init_tracing(&config.environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting API"
    );

    let (db, redis) = tokio::try_join!(
        async {
            database::postgres::connect_from_config_with_retry(
                config.database.clone(),
                Some(RetryConfig::startup()),
            )
            .await
            .wrap_err("Failed to connect to PostgreSQL")
        },
        async {
            database::redis::connect_from_config_with_retry(
                config.redis.clone(),
                Some(RetryConfig::startup()),
            )
            .await
            .wrap_err("Failed to connect to Redis")
        }
    )?;

    database::postgres::run_migrations::<Migrator>(&db, env!("CARGO_PKG_NAME"))
        .await
        .wrap_err("Failed to run migrations")?;

    let live = Arc::new(LiveHub::new(redis.clone()));
    let occurrences = OccurrenceService::new(PgOccurrenceRepository::new(db.clone()))
        .with_listener(Arc::new(LiveStatusListener::new(live)));
    let rules = TriageRuleService::new(Arc::new(PgTriageRuleRepository::new(db.clone())))
        .with_publisher(Arc::new(RedisInvalidationPublisher::new(redis.clone())));
    let feed = LiveFeed::new(config.live_feed_capacity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed_task = tokio::spawn(feed.clone().run(config.redis.url.clone(), shutdown_rx));

    let api = routes(ApiServices {
        occurrences,
        rules,
        feed,
    });
    let app = create_router::<openapi::ApiDoc>(api, &config.server).merge(health_router(ReadyState {
        db: db.clone(),
        redis,
    }));

    // SSE connections hold the server open; end them with the feed
    let served = create_app(app, &config.server, async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    })
    .await;

    if let Err(e) = feed_task.await {
        error!(error = %e, "Live feed task failed");
    }
    if let Err(e) = db.close().await {
        error!(error = %e, "Error closing PostgreSQL pool");
    }
    served.wrap_err("Server error")?;

    info!("API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use core_config::server::ServerConfig;
    use http_body_util::BodyExt;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use tower::ServiceExt;

    fn app() -> Router {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let api = routes(ApiServices {
            occurrences: OccurrenceService::new(PgOccurrenceRepository::new(db.clone())),
            rules: TriageRuleService::new(Arc::new(PgTriageRuleRepository::new(db))),
            feed: LiveFeed::new(8),
        });
        create_router::<openapi::ApiDoc>(api, &ServerConfig::default())
    }

    #[tokio::test]
    async fn test_every_api_prefix_requires_identity() {
        for uri in ["/api/v1/occurrences", "/api/v1/triage-rules", "/api/v1/live"] {
            let response = app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_malformed_identity_headers_are_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/occurrences")
                    .header("x-user-id", "not-a-uuid")
                    .header("x-tenant-id", "also-not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document_covers_all_areas() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for prefix in ["/occurrences", "/triage-rules", "/live"] {
            assert!(
                paths.keys().any(|p| p.starts_with(prefix)),
                "missing {prefix} in {:?}",
                paths.keys().collect::<Vec<_>>()
            );
        }
    }
}
