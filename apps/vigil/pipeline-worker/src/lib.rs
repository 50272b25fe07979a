//! Pipeline Worker
//!
//! ```text
//! eligible_records ──► Poller (one task per hospital)
//!                        │ XADD
//!                        ▼
//!              obitos:detectados ──► StreamWorker<DetectionEvent, TriageProcessor>
//!                                         │ OccurrenceService::create
//!                                         ▼
//!                                    Dispatcher ──► live hub (PUBLISH)
//!                                         │ XADD
//!                                         ▼
//!              notificacoes:entregas ──► StreamWorker<DeliveryJob, DeliveryProcessor>
//!
//! triagem:rules:invalidate ──► rule-invalidation listener ──► RuleCache
//! ```
//!
//! Every task watches the same shutdown channel. SIGINT/SIGTERM flips it;
//! the process then waits for the tasks to drain, up to a grace period.

pub mod health;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use core_config::tracing::{init_tracing, install_color_eyre};
use database::common::RetryConfig;
use domain_occurrences::{OccurrenceService, PgOccurrenceRepository};
use domain_triage::{
    DetectionEvent, DetectionStream, PgEligibleRecordRepository, PgHospitalDirectory,
    PgTriageRuleRepository, Poller, RuleCache, TriageProcessor, run_invalidation_listener,
};
use eyre::{Result, WrapErr};
use notification_dispatch::{
    DeliveryJob, DeliveryProcessor, DeliveryStream, Dispatcher, LiveHub, PgNotificationRepository,
    PgRecipientDirectory, SmtpProvider, TwilioSmsProvider,
};
use stream_worker::{HealthState, StreamProducer, StreamWorker, WorkerConfig, health_router, metrics};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::health::{PipelineState, PostgresCheck, pipeline_router};
use crate::settings::WorkerSettings;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Concurrent deliveries; providers are network-bound
const DELIVERY_CONCURRENCY: usize = 8;

async fn start_health_server(
    app: Router,
    address: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {address}"))?;
    info!(address = %address, "Health and admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Health server failed")
}

/// Run the pipeline worker until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, if Postgres or Redis stay
/// unreachable through the startup retries, or if a configured email
/// provider cannot be built.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let settings = WorkerSettings::from_env()?;
    init_tracing(&settings.environment);
    metrics::init_metrics();

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "Starting pipeline worker"
    );

    let redis_url = settings.redis.url.clone();
    let (db, redis) = tokio::try_join!(
        async {
            database::postgres::connect_from_config_with_retry(
                settings.database.clone(),
                Some(RetryConfig::startup()),
            )
            .await
            .wrap_err("Failed to connect to PostgreSQL")
        },
        async {
            database::redis::connect_from_config_with_retry(
                settings.redis.clone(),
                Some(RetryConfig::startup()),
            )
            .await
            .wrap_err("Failed to connect to Redis")
        }
    )?;

    // Stores
    let records = Arc::new(PgEligibleRecordRepository::new(db.clone()));
    let hospitals = Arc::new(PgHospitalDirectory::new(db.clone()));
    let notifications = Arc::new(PgNotificationRepository::new(db.clone()));
    let occurrences = OccurrenceService::new(PgOccurrenceRepository::new(db.clone()));
    let rule_cache = Arc::new(RuleCache::new(
        Arc::new(PgTriageRuleRepository::new(db.clone())),
        settings.triage.rule_cache_ttl,
        settings.triage.window_hours,
    ));

    // Dispatcher: live push inline, email/SMS through the delivery stream
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(LiveHub::new(redis.clone())),
        Arc::new(PgRecipientDirectory::new(db.clone())),
        Arc::new(StreamProducer::from_stream_def::<DeliveryStream>(redis.clone())),
        Arc::new(occurrences.clone()),
        notifications.clone(),
        settings.dispatch.clone(),
    ));

    let poller = Arc::new(Poller::new(
        records.clone(),
        hospitals.clone(),
        Arc::new(StreamProducer::from_stream_def::<DetectionStream>(redis.clone())),
        settings.poller.clone(),
    ));

    let triage = Arc::new(TriageProcessor::new(
        records,
        hospitals,
        Arc::new(occurrences),
        rule_cache.clone(),
        dispatcher,
    ));
    let triage_config = WorkerConfig::from_stream_def::<DetectionStream>()
        .with_batch_size(settings.triage.batch_size)
        .with_block_timeout_ms(settings.triage.block_ms)
        .with_claim_timeout_ms(settings.triage.claim_idle_ms);
    let triage_worker = StreamWorker::<DetectionEvent, _>::with_arc_processor(
        redis.clone(),
        triage.clone(),
        triage_config,
    );

    let mut delivery = DeliveryProcessor::new(notifications, settings.dispatch.clone());
    match settings.smtp.clone() {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "Email channel enabled");
            delivery = delivery.with_email(Arc::new(SmtpProvider::new(smtp)?));
        }
        None => warn!("SMTP_HOST not set, email channel disabled"),
    }
    match settings.twilio.clone() {
        Some(twilio) => {
            info!("SMS channel enabled");
            let provider = TwilioSmsProvider::new(twilio, settings.dispatch.channel_timeout)
                .wrap_err("Failed to build Twilio client")?;
            delivery = delivery.with_sms(Arc::new(provider));
        }
        None => warn!("Twilio credentials not set, SMS channel disabled"),
    }
    let delivery_config = WorkerConfig::from_stream_def::<DeliveryStream>()
        .with_max_concurrent_jobs(DELIVERY_CONCURRENCY);
    let delivery_worker = StreamWorker::<DeliveryJob, _>::new(redis.clone(), delivery, delivery_config);

    let health_state = HealthState::new(redis.clone(), env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .with_consumer(triage_worker.consumer())
        .with_consumer(delivery_worker.consumer())
        .with_check(Arc::new(PostgresCheck::new(db.clone())));
    let health_app = health_router(health_state).merge(pipeline_router(PipelineState {
        poller: poller.clone(),
        triage,
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<&'static str> = JoinSet::new();

    {
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            poller.run(rx).await;
            "poller"
        });
    }
    {
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            if let Err(e) = triage_worker.run(rx).await {
                error!(error = %e, "Triage worker stopped with an error");
            }
            "triage-worker"
        });
    }
    {
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            if let Err(e) = delivery_worker.run(rx).await {
                error!(error = %e, "Delivery worker stopped with an error");
            }
            "delivery-worker"
        });
    }
    {
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            run_invalidation_listener(redis_url, rule_cache, rx).await;
            "rule-invalidation"
        });
    }
    {
        let rx = shutdown_rx.clone();
        let address = settings.server.health_address();
        tasks.spawn(async move {
            if let Err(e) = start_health_server(health_app, address, rx).await {
                error!(error = ?e, "Health server stopped");
            }
            "health-server"
        });
    }

    // A task ending on its own is treated like a shutdown request
    tokio::select! {
        _ = axum_helpers::shutdown_signal() => {}
        Some(ended) = tasks.join_next() => match ended {
            Ok(name) => error!(task = name, "Task exited unexpectedly, shutting down"),
            Err(e) => error!(error = %e, "Task panicked, shutting down"),
        },
    }
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(ended) = tasks.join_next().await {
            match ended {
                Ok(name) => info!(task = name, "Task stopped"),
                Err(e) => error!(error = %e, "Task failed during shutdown"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Grace period elapsed, aborting remaining tasks");
        tasks.abort_all();
    }

    if let Err(e) = db.close().await {
        error!(error = %e, "Error closing PostgreSQL pool");
    }
    info!("Pipeline worker stopped");
    Ok(())
}
